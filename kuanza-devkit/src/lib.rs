/*!
# Kuanza DevKit - test doubles and harness for the resilience kernel

- `ScriptedTarget`: sync target whose answers are scripted, records pushes
- `RecordingGateway`: SMS gateway that keeps every outbound message
- `TestHarness`: fully wired in-memory `AppState`, optionally served over HTTP
*/

pub mod gateway_stub;
pub mod target_stub;
pub mod test_utils;

pub use gateway_stub::RecordingGateway;
pub use target_stub::{Push, Script, ScriptedTarget};
pub use test_utils::{test_config, TestHarness, TestServer};
