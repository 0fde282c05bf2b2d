pub(crate) mod pr_review;

/// Scenarios compiled into the binary, selected by the plan's `scenario` key.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, strum::Display, strum::EnumString, strum::VariantNames,
)]
#[strum(serialize_all = "kebab-case")]
pub(crate) enum ScenarioKind {
    PrReview,
}

impl ScenarioKind {
    pub fn names() -> &'static [&'static str] {
        <Self as strum::VariantNames>::VARIANTS
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_round_trip() {
        assert_eq!(ScenarioKind::names(), ["pr-review"]);
        assert_eq!("pr-review".parse::<ScenarioKind>().ok(), Some(ScenarioKind::PrReview));
        assert_eq!(ScenarioKind::PrReview.to_string(), "pr-review");
        assert!("PrReview".parse::<ScenarioKind>().is_err());
    }
}
