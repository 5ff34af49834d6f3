//! Instagram Direct adapter.

use crate::pattern::{MatchMode, PatternTable};

use super::{AuthChallenge, Credentials, LoginFlow, PlatformAdapter, PlatformId, Selectors};

const USERNAME_FIELD: &str = "input[name=\"username\"]";

pub fn adapter() -> PlatformAdapter {
    PlatformAdapter {
        id: PlatformId::Ig,
        home_url: "https://www.instagram.com/".to_string(),
        login_url: "https://www.instagram.com/accounts/login/".to_string(),
        conversation_url: "https://www.instagram.com/direct/t/17844930656636725/".to_string(),
        login: LoginFlow::Credentials {
            username_field: USERNAME_FIELD.to_string(),
            password_field: "input[name=\"password\"]".to_string(),
            submit: "button[type=\"submit\"]".to_string(),
        },
        // Logged in once the login form is gone and no challenge is showing.
        success_indicator: None,
        rejected_indicator: Some("#slfErrorAlert".to_string()),
        logged_out_indicator: Some(USERNAME_FIELD.to_string()),
        challenges: vec![AuthChallenge::VerificationCode {
            field: "input[name=\"verificationCode\"]".to_string(),
            submit: Some("button[type=\"button\"]".to_string()),
        }],
        unlock: AuthChallenge::None,
        selectors: Selectors {
            composer: "div[contenteditable=\"true\"][role=\"textbox\"]".to_string(),
            container: "div[role=\"grid\"]".to_string(),
            message: "div[role=\"row\"]".to_string(),
            blocking: None,
        },
        echo_marker: Some("你傳送了IGD".to_string()),
        probe_input: "介紹".to_string(),
        match_mode: MatchMode::Prefix,
        patterns: PatternTable::new()
            .with("A", "介紹", &["阿羅哈您好", "阿羅哈愛爾麗"])
            .with("A", "hi", &["阿羅哈您好", "阿羅哈愛爾麗"])
            .with("B", "介紹", &["阿羅哈您好", "阿羅哈愛爾麗"])
            .with("B", "hi", &["阿羅哈Hi!"]),
        credentials: Credentials::default(),
    }
}
