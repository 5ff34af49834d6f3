//! Facebook Messenger adapter.
//!
//! Login is manual (the account normally needs a human for captcha and
//! device approval); the operator confirms with `save`. Conversations may be
//! locked behind an end-to-end encryption PIN widget, typed from config.

use crate::pattern::{MatchMode, PatternTable};

use super::{AuthChallenge, Credentials, LoginFlow, PlatformAdapter, PlatformId, Selectors};

const PIN_WIDGET: &str = "#mw-numeric-code-input-prevent-composer-focus-steal";

/// Reply prefixes the Develope club bot answers with.
const GREETING: &str = "Develope club\n您好";
const MASCOT: &str = "Develope club\n愛爾麗";
const HI: &str = "Develope club\nHi!";

pub fn adapter() -> PlatformAdapter {
    PlatformAdapter {
        id: PlatformId::Fb,
        home_url: "https://www.messenger.com/".to_string(),
        login_url: "https://www.messenger.com/login.php".to_string(),
        conversation_url: "https://www.messenger.com/t/110456171431210".to_string(),
        login: LoginFlow::Manual {
            confirm_word: "save".to_string(),
        },
        success_indicator: None,
        rejected_indicator: None,
        logged_out_indicator: Some("input[name=\"email\"]".to_string()),
        challenges: Vec::new(),
        unlock: AuthChallenge::NumericPin {
            field: PIN_WIDGET.to_string(),
            submit: None,
        },
        selectors: Selectors {
            composer: "div[contenteditable=\"true\"][role=\"textbox\"]".to_string(),
            container: "div[role=\"main\"]".to_string(),
            message: ".x78zum5.xdt5ytf.x1n2onr6[role=\"gridcell\"]".to_string(),
            blocking: Some(PIN_WIDGET.to_string()),
        },
        echo_marker: Some("You sent\n".to_string()),
        probe_input: "介紹".to_string(),
        match_mode: MatchMode::Prefix,
        patterns: patterns(),
        credentials: Credentials::default(),
    }
}

/// A greets on both inputs; B answers "hi" with its own line.
fn patterns() -> PatternTable {
    PatternTable::new()
        .with("A", "介紹", &[GREETING, MASCOT])
        .with("A", "hi", &[GREETING, MASCOT])
        .with("B", "介紹", &[GREETING, MASCOT])
        .with("B", "hi", &[HI])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn login_is_manual_with_save() {
        let adapter = adapter();
        assert_eq!(
            adapter.login,
            LoginFlow::Manual {
                confirm_word: "save".to_string()
            }
        );
    }

    #[test]
    fn pin_widget_blocks_sending() {
        let adapter = adapter();
        assert_eq!(adapter.unlock.field(), Some(PIN_WIDGET));
        assert_eq!(adapter.selectors.blocking.as_deref(), Some(PIN_WIDGET));
    }

    #[test]
    fn type_b_expects_hi_reply_to_follow_up() {
        let adapter = adapter();
        let table = &adapter.patterns;
        assert!(
            table
                .classify(adapter.match_mode, "B", "hi", "Develope club\nHi!")
                .is_match()
        );
        assert!(
            !table
                .classify(adapter.match_mode, "A", "hi", "Develope club\nHi!")
                .is_match()
        );
    }

    #[test]
    fn no_c_variant_is_shipped() {
        assert_eq!(adapter().patterns.response_types(), vec!["A", "B"]);
    }
}
