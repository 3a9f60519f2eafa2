//! USSD proof-of-delivery menu as an explicit state machine.
//!
//! A USSD gateway resends the whole input typed so far on every turn
//! (`"1"`, then `"11"` or `"1*1"`), so each request is walked from
//! `MainMenu` through the transition table.

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UssdMenu {
    MainMenu,
    ConfirmDelivery,
    ReportIssue,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reply {
    Main,
    ConfirmPrompt,
    DeliveryConfirmed,
    IssueMenu,
    IssueReported(IssueReason),
    InvalidOption,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueReason {
    RecipientAbsent,
    WrongAddress,
    DamagedPackage,
}

impl IssueReason {
    fn label(self) -> &'static str {
        match self {
            Self::RecipientAbsent => "recipient absent",
            Self::WrongAddress => "wrong address",
            Self::DamagedPackage => "damaged package",
        }
    }
}

struct Transition {
    from: UssdMenu,
    input: &'static str,
    reply: Reply,
    next: UssdMenu,
}

const TRANSITIONS: &[Transition] = &[
    Transition {
        from: UssdMenu::MainMenu,
        input: "1",
        reply: Reply::ConfirmPrompt,
        next: UssdMenu::ConfirmDelivery,
    },
    Transition {
        from: UssdMenu::MainMenu,
        input: "2",
        reply: Reply::IssueMenu,
        next: UssdMenu::ReportIssue,
    },
    Transition {
        from: UssdMenu::ConfirmDelivery,
        input: "1",
        reply: Reply::DeliveryConfirmed,
        next: UssdMenu::MainMenu,
    },
    Transition {
        from: UssdMenu::ConfirmDelivery,
        input: "2",
        reply: Reply::Main,
        next: UssdMenu::MainMenu,
    },
    Transition {
        from: UssdMenu::ReportIssue,
        input: "1",
        reply: Reply::IssueReported(IssueReason::RecipientAbsent),
        next: UssdMenu::MainMenu,
    },
    Transition {
        from: UssdMenu::ReportIssue,
        input: "2",
        reply: Reply::IssueReported(IssueReason::WrongAddress),
        next: UssdMenu::MainMenu,
    },
    Transition {
        from: UssdMenu::ReportIssue,
        input: "3",
        reply: Reply::IssueReported(IssueReason::DamagedPackage),
        next: UssdMenu::MainMenu,
    },
];

fn step(state: UssdMenu, input: &str) -> Option<&'static Transition> {
    TRANSITIONS.iter().find(|t| t.from == state && t.input == input)
}

/// Splits accumulated input: `"1*2"` by stars, `"12"` digit by digit.
fn tokens(command: &str) -> Vec<String> {
    let command = command.trim().trim_end_matches('#');
    if command.contains('*') {
        command.split('*').filter(|t| !t.is_empty()).map(str::to_string).collect()
    } else {
        command.chars().filter(|c| !c.is_whitespace()).map(String::from).collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Turn {
    pub reply: Reply,
    pub next: UssdMenu,
}

/// Walks the whole accumulated input from the main menu.
pub fn walk(command: &str) -> Turn {
    let mut turn = Turn { reply: Reply::Main, next: UssdMenu::MainMenu };
    for token in tokens(command) {
        match step(turn.next, &token) {
            Some(t) => turn = Turn { reply: t.reply, next: t.next },
            None => {
                return Turn { reply: Reply::InvalidOption, next: UssdMenu::MainMenu };
            }
        }
    }
    turn
}

pub fn render(reply: Reply, tracking_number: &str) -> String {
    const MAIN: &str = "1. Confirm delivery\n2. Report issue";
    match reply {
        Reply::Main => format!("Delivery {tracking_number}\n{MAIN}"),
        Reply::ConfirmPrompt => format!("Confirm delivery of {tracking_number}?\n1. Yes\n2. No"),
        Reply::DeliveryConfirmed => format!("Delivery {tracking_number} confirmed. Thank you."),
        Reply::IssueMenu => format!(
            "Issue with {tracking_number}:\n1. Recipient absent\n2. Wrong address\n3. Damaged package"
        ),
        Reply::IssueReported(reason) => {
            format!("Issue reported for {tracking_number}: {}.", reason.label())
        }
        Reply::InvalidOption => format!("Invalid option.\n{MAIN}"),
    }
}
