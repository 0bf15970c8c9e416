use serde::{Deserialize, Serialize};

/// Subscription tier, as recorded by the billing system. This subsystem only
/// ever reads it; purchases happen elsewhere.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Plan {
    Free,
    Premium,
    Elite,
}

impl Plan {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Free => "free",
            Self::Premium => "premium",
            Self::Elite => "elite",
        }
    }

    /// Unknown plan strings read as `Free`; a stale row never grants access.
    pub fn parse(s: &str) -> Self {
        match s {
            "premium" => Self::Premium,
            "elite" => Self::Elite,
            _ => Self::Free,
        }
    }

    pub fn is_elite(&self) -> bool {
        matches!(self, Self::Elite)
    }

    pub fn is_premium_or_better(&self) -> bool {
        matches!(self, Self::Premium | Self::Elite)
    }
}

impl std::fmt::Display for Plan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Video-call entitlement: an explicit per-account toggle or a paid tier.
pub fn can_video_chat(plan: Plan, toggle: bool) -> bool {
    toggle || plan.is_premium_or_better()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plan_parse_unknown_is_free() {
        assert_eq!(Plan::parse("elite"), Plan::Elite);
        assert_eq!(Plan::parse("premium"), Plan::Premium);
        assert_eq!(Plan::parse("gold"), Plan::Free);
        assert_eq!(Plan::parse(""), Plan::Free);
    }

    #[test]
    fn test_entitlement_ladder() {
        assert!(!can_video_chat(Plan::Free, false));
        assert!(can_video_chat(Plan::Free, true));
        assert!(can_video_chat(Plan::Premium, false));
        assert!(can_video_chat(Plan::Elite, false));
        assert!(Plan::Elite.is_elite());
        assert!(!Plan::Premium.is_elite());
        assert!(Plan::Premium.is_premium_or_better());
    }
}
