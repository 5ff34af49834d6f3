//! Line adapter, driving the Line web client.
//!
//! Replies are matched with [`MatchMode::Contains`]: the bot's answers arrive
//! with a decorated sender line, so a reply is a pass when the expected text
//! appears anywhere in it. There is no echo marker; our own probes never
//! contain the expected text.

use crate::pattern::{MatchMode, PatternTable};

use super::{AuthChallenge, Credentials, LoginFlow, PlatformAdapter, PlatformId, Selectors};

const HOME: &str = "chrome-extension://ophjlpahpchlmihnnnihgmmeilfjmjjc/index.html";

pub fn adapter() -> PlatformAdapter {
    PlatformAdapter {
        id: PlatformId::Line,
        home_url: HOME.to_string(),
        login_url: HOME.to_string(),
        // The chat is opened from the friend list; override with a deep link.
        conversation_url: HOME.to_string(),
        login: LoginFlow::Manual {
            confirm_word: "save".to_string(),
        },
        success_indicator: None,
        rejected_indicator: None,
        logged_out_indicator: Some("input[name=\"email\"]".to_string()),
        challenges: Vec::new(),
        unlock: AuthChallenge::None,
        selectors: Selectors {
            composer: "textarea".to_string(),
            container: "main".to_string(),
            message: "[data-message-content]".to_string(),
            blocking: None,
        },
        echo_marker: None,
        probe_input: "aloha".to_string(),
        match_mode: MatchMode::Contains,
        patterns: PatternTable::new()
            .with("A", "aloha", &["Aloha"])
            .with("A", "hi", &["你好"])
            .with("B", "aloha", &["Aloha"])
            // Only the bot's signature is fixed; the rest of the B answer
            // varies. Pin the full text with [platforms.line.patterns.B].
            .with("B", "hi", &["developeclub"]),
        credentials: Credentials::default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aloha_probe_expects_aloha_anywhere() {
        let adapter = adapter();
        assert_eq!(adapter.probe_input, "aloha");
        assert!(
            adapter
                .patterns
                .classify(adapter.match_mode, "A", "aloha", "develope club\nAloha!")
                .is_match()
        );
    }

    #[test]
    fn hi_expectations_match_rendered_dom_text() {
        let adapter = adapter();
        let classify = |rt: &str, text: &str| {
            adapter
                .patterns
                .classify(adapter.match_mode, rt, "hi", text)
                .is_match()
        };
        assert!(classify("A", "develope club\n你好"));
        assert!(!classify("A", "develope club\nAloha"));
        assert!(classify("B", "develope club\ndevelopeclub 回覆您"));
        assert!(!classify("B", "develope club\n你好"));
    }

    #[test]
    fn own_probe_does_not_match() {
        let adapter = adapter();
        assert!(
            !adapter
                .patterns
                .classify(adapter.match_mode, "B", "aloha", "aloha")
                .is_match()
        );
        assert!(adapter.echo_marker.is_none());
    }
}
