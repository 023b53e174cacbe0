//! Plan catalog and tier-aware quota ceilings
//!
//! The catalog is the single authority for prices and ceilings. Handlers
//! never accept amounts or limits from the client; they look them up here.

use serde::{Deserialize, Serialize};

/// Subscription tier ordered by entitlement
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubscriptionTier {
    Free,
    Pro,
    Lifetime,
}

impl SubscriptionTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubscriptionTier::Free => "free",
            SubscriptionTier::Pro => "pro",
            SubscriptionTier::Lifetime => "lifetime",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "free" => Some(SubscriptionTier::Free),
            "pro" => Some(SubscriptionTier::Pro),
            "lifetime" => Some(SubscriptionTier::Lifetime),
            _ => None,
        }
    }
}

impl std::fmt::Display for SubscriptionTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Quota-metered AI features
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Feature {
    DailyPlan,
    WeeklyReport,
    Chat,
    ThemeRecommend,
    ThemeGenerate,
}

/// Reset window granularity for a feature
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowKind {
    Daily,
    Weekly,
}

impl Feature {
    pub const ALL: [Feature; 5] = [
        Feature::DailyPlan,
        Feature::WeeklyReport,
        Feature::Chat,
        Feature::ThemeRecommend,
        Feature::ThemeGenerate,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Feature::DailyPlan => "daily_plan",
            Feature::WeeklyReport => "weekly_report",
            Feature::Chat => "chat",
            Feature::ThemeRecommend => "theme_recommend",
            Feature::ThemeGenerate => "theme_generate",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "daily_plan" => Some(Feature::DailyPlan),
            "weekly_report" => Some(Feature::WeeklyReport),
            "chat" => Some(Feature::Chat),
            "theme_recommend" => Some(Feature::ThemeRecommend),
            "theme_generate" => Some(Feature::ThemeGenerate),
            _ => None,
        }
    }

    /// weekly_report accumulates per ISO week; everything else per local day
    pub fn window(&self) -> WindowKind {
        match self {
            Feature::WeeklyReport => WindowKind::Weekly,
            _ => WindowKind::Daily,
        }
    }
}

impl std::fmt::Display for Feature {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Per-window ceiling for a (tier, feature) pair. `None` means unbounded.
pub fn ceiling(tier: SubscriptionTier, feature: Feature) -> Option<i64> {
    use Feature::*;
    use SubscriptionTier::*;
    match (tier, feature) {
        (Lifetime, _) => None,
        (Free, DailyPlan) => Some(3),
        (Free, WeeklyReport) => Some(1),
        (Free, Chat) => Some(10),
        (Free, ThemeRecommend) => Some(5),
        (Free, ThemeGenerate) => Some(3),
        (Pro, DailyPlan) => Some(50),
        (Pro, WeeklyReport) => Some(10),
        (Pro, Chat) => Some(100),
        (Pro, ThemeRecommend) => Some(50),
        (Pro, ThemeGenerate) => Some(50),
    }
}

/// Purchasable plan
#[derive(Debug, Clone, Copy, Serialize)]
pub struct Plan {
    pub id: &'static str,
    pub display_name: &'static str,
    pub tier: SubscriptionTier,
    /// `None` means forever (lifetime entitlement)
    pub duration_days: Option<i64>,
    pub currency: &'static str,
    /// Catalog price in minor units (fen for CNY)
    pub price_cents: i64,
}

/// The three canonical plans. Prices here are authoritative; debug
/// overrides are never consulted at request time.
pub const PLAN_CATALOG: [Plan; 3] = [
    Plan {
        id: "pro_monthly",
        display_name: "GaiYa Pro (monthly)",
        tier: SubscriptionTier::Pro,
        duration_days: Some(30),
        currency: "CNY",
        price_cents: 2900,
    },
    Plan {
        id: "pro_yearly",
        display_name: "GaiYa Pro (yearly)",
        tier: SubscriptionTier::Pro,
        duration_days: Some(365),
        currency: "CNY",
        price_cents: 28800,
    },
    Plan {
        id: "team_partner",
        display_name: "GaiYa Lifetime Partner",
        tier: SubscriptionTier::Lifetime,
        duration_days: None,
        currency: "CNY",
        price_cents: 64800,
    },
];

pub fn plan_by_id(id: &str) -> Option<&'static Plan> {
    PLAN_CATALOG.iter().find(|p| p.id == id)
}

impl Plan {
    /// Callback amounts may drift by gateway rounding; accept up to 5% over
    /// the catalog price and nothing below it.
    pub fn amount_acceptable(&self, amount_cents: i64) -> bool {
        amount_cents > 0
            && amount_cents >= self.price_cents
            && amount_cents * 100 <= self.price_cents * 105
    }

    /// Price formatted the way Z-Pay expects (`"29.00"`)
    pub fn price_decimal(&self) -> String {
        format!("{}.{:02}", self.price_cents / 100, self.price_cents % 100)
    }
}

/// Theme style served by /styles-list
#[derive(Debug, Clone, Copy, Serialize)]
pub struct ThemeStyle {
    pub id: &'static str,
    pub name: &'static str,
    pub category: &'static str,
    pub featured: bool,
    /// Minimum tier required to unlock this style
    pub min_tier: SubscriptionTier,
}

pub const THEME_STYLES: [ThemeStyle; 10] = [
    ThemeStyle { id: "classic_bar", name: "Classic Bar", category: "minimal", featured: true, min_tier: SubscriptionTier::Free },
    ThemeStyle { id: "ink_wash", name: "Ink Wash", category: "artistic", featured: true, min_tier: SubscriptionTier::Free },
    ThemeStyle { id: "pixel_quest", name: "Pixel Quest", category: "retro", featured: false, min_tier: SubscriptionTier::Free },
    ThemeStyle { id: "aurora", name: "Aurora", category: "gradient", featured: true, min_tier: SubscriptionTier::Pro },
    ThemeStyle { id: "zen_garden", name: "Zen Garden", category: "artistic", featured: false, min_tier: SubscriptionTier::Pro },
    ThemeStyle { id: "neon_city", name: "Neon City", category: "retro", featured: true, min_tier: SubscriptionTier::Pro },
    ThemeStyle { id: "paper_craft", name: "Paper Craft", category: "minimal", featured: false, min_tier: SubscriptionTier::Pro },
    ThemeStyle { id: "starfield", name: "Starfield", category: "gradient", featured: false, min_tier: SubscriptionTier::Pro },
    ThemeStyle { id: "mecha_hud", name: "Mecha HUD", category: "retro", featured: false, min_tier: SubscriptionTier::Pro },
    ThemeStyle { id: "season_drift", name: "Season Drift", category: "artistic", featured: true, min_tier: SubscriptionTier::Pro },
];

/// Styles visible to a tier, optionally filtered by category and featured flag
pub fn styles_for(
    tier: SubscriptionTier,
    category: Option<&str>,
    featured: Option<bool>,
) -> Vec<&'static ThemeStyle> {
    THEME_STYLES
        .iter()
        .filter(|s| tier >= s.min_tier)
        .filter(|s| category.map_or(true, |c| s.category == c))
        .filter(|s| featured.map_or(true, |f| s.featured == f))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tier_ordering_matches_entitlement() {
        assert!(SubscriptionTier::Free < SubscriptionTier::Pro);
        assert!(SubscriptionTier::Pro < SubscriptionTier::Lifetime);
    }

    #[test]
    fn lifetime_is_unbounded_everywhere() {
        for feature in Feature::ALL {
            assert_eq!(ceiling(SubscriptionTier::Lifetime, feature), None);
        }
    }

    #[test]
    fn free_ceilings_match_catalog() {
        assert_eq!(ceiling(SubscriptionTier::Free, Feature::DailyPlan), Some(3));
        assert_eq!(ceiling(SubscriptionTier::Free, Feature::WeeklyReport), Some(1));
        assert_eq!(ceiling(SubscriptionTier::Free, Feature::Chat), Some(10));
    }

    #[test]
    fn plan_lookup() {
        let plan = plan_by_id("pro_monthly").unwrap();
        assert_eq!(plan.price_cents, 2900);
        assert_eq!(plan.duration_days, Some(30));
        assert_eq!(plan.price_decimal(), "29.00");
        assert!(plan_by_id("pro_weekly").is_none());
    }

    #[test]
    fn lifetime_plan_has_no_duration() {
        let plan = plan_by_id("team_partner").unwrap();
        assert_eq!(plan.tier, SubscriptionTier::Lifetime);
        assert!(plan.duration_days.is_none());
    }

    #[test]
    fn amount_tolerance_is_five_percent() {
        let plan = plan_by_id("pro_monthly").unwrap();
        assert!(plan.amount_acceptable(2900));
        assert!(plan.amount_acceptable(3045)); // exactly 5% over
        assert!(!plan.amount_acceptable(3046));
        assert!(!plan.amount_acceptable(2899)); // underpayment rejected
        assert!(!plan.amount_acceptable(0));
        assert!(!plan.amount_acceptable(-2900));
    }

    #[test]
    fn style_gating_by_tier() {
        let free = styles_for(SubscriptionTier::Free, None, None);
        let pro = styles_for(SubscriptionTier::Pro, None, None);
        assert_eq!(free.len(), 3);
        assert_eq!(pro.len(), THEME_STYLES.len());
        assert!(free.iter().all(|s| s.min_tier == SubscriptionTier::Free));
    }

    #[test]
    fn style_filters_compose() {
        let featured_retro = styles_for(SubscriptionTier::Lifetime, Some("retro"), Some(true));
        assert_eq!(featured_retro.len(), 1);
        assert_eq!(featured_retro[0].id, "neon_city");
    }
}
