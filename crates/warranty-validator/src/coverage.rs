//! What a warranty pays for.

use serde::Serialize;
use warranty_core::{IssueCategory, Money, ProductInfo, WarrantyWindow};

/// How a policy treats one issue category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CoverageDecision {
    Covered,
    Excluded,
    AssessmentRequired,
    /// The issue would be covered, but the warranty cannot be claimed.
    WarrantyInactive,
}

/// Public summary of what a barcode's warranty covers right now.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Coverage {
    pub active: bool,
    pub covered_issues: Vec<IssueCategory>,
    pub excluded_issues: Vec<IssueCategory>,
    pub assessment_required: Vec<IssueCategory>,
}

/// A policy's verdict on a single reported issue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Assessment {
    pub issue: IssueCategory,
    pub decision: CoverageDecision,
    /// What the customer should expect to pay. Zero when covered.
    pub estimated_cost: Money,
    pub recommendations: Vec<String>,
    pub next_steps: Vec<String>,
}

impl Assessment {
    pub fn covered(&self) -> bool {
        self.decision == CoverageDecision::Covered
    }
}

pub trait CoveragePolicy: Send + Sync + 'static {
    fn summary(&self, window: &WarrantyWindow) -> Coverage;

    /// `product` is `None` when the catalog no longer knows the product; cost
    /// estimates then fall back to zero.
    fn assess(
        &self,
        window: &WarrantyWindow,
        issue: IssueCategory,
        product: Option<&ProductInfo>,
    ) -> Assessment;
}

const ALL_ISSUES: [IssueCategory; 9] = [
    IssueCategory::Hardware,
    IssueCategory::Software,
    IssueCategory::Defect,
    IssueCategory::Malfunction,
    IssueCategory::Battery,
    IssueCategory::Display,
    IssueCategory::PhysicalDamage,
    IssueCategory::WaterDamage,
    IssueCategory::Other,
];

/// Manufacturing faults are covered while the warranty can be claimed.
/// Accidental damage is excluded and priced as a share of the product's base
/// price; anything else goes to a technician for assessment.
#[derive(Debug, Clone)]
pub struct StandardCoveragePolicy {
    pub physical_damage_percent: u32,
    pub water_damage_percent: u32,
    pub assessment_percent: u32,
    /// Estimate for a covered category once the warranty has lapsed.
    pub out_of_warranty_percent: u32,
}

impl Default for StandardCoveragePolicy {
    fn default() -> Self {
        Self {
            physical_damage_percent: 40,
            water_damage_percent: 60,
            assessment_percent: 25,
            out_of_warranty_percent: 50,
        }
    }
}

impl StandardCoveragePolicy {
    fn classify(&self, issue: IssueCategory) -> CoverageDecision {
        match issue {
            IssueCategory::Hardware
            | IssueCategory::Software
            | IssueCategory::Defect
            | IssueCategory::Malfunction
            | IssueCategory::Battery
            | IssueCategory::Display => CoverageDecision::Covered,
            IssueCategory::PhysicalDamage | IssueCategory::WaterDamage => CoverageDecision::Excluded,
            IssueCategory::Other => CoverageDecision::AssessmentRequired,
        }
    }

    fn estimate_percent(&self, issue: IssueCategory, decision: CoverageDecision) -> u32 {
        match (decision, issue) {
            (CoverageDecision::Covered, _) => 0,
            (CoverageDecision::WarrantyInactive, _) => self.out_of_warranty_percent,
            (_, IssueCategory::PhysicalDamage) => self.physical_damage_percent,
            (_, IssueCategory::WaterDamage) => self.water_damage_percent,
            _ => self.assessment_percent,
        }
    }
}

impl CoveragePolicy for StandardCoveragePolicy {
    fn summary(&self, window: &WarrantyWindow) -> Coverage {
        let mut coverage = Coverage {
            active: window.can_claim,
            covered_issues: Vec::new(),
            excluded_issues: Vec::new(),
            assessment_required: Vec::new(),
        };
        for issue in ALL_ISSUES {
            match self.classify(issue) {
                CoverageDecision::Covered => coverage.covered_issues.push(issue),
                CoverageDecision::Excluded => coverage.excluded_issues.push(issue),
                _ => coverage.assessment_required.push(issue),
            }
        }
        coverage
    }

    fn assess(
        &self,
        window: &WarrantyWindow,
        issue: IssueCategory,
        product: Option<&ProductInfo>,
    ) -> Assessment {
        let decision = match self.classify(issue) {
            CoverageDecision::Covered if !window.can_claim => CoverageDecision::WarrantyInactive,
            decision => decision,
        };
        let base_price = product.map(|p| p.base_price).unwrap_or(Money::ZERO);
        let estimated_cost = base_price.percent(self.estimate_percent(issue, decision));

        let (recommendations, next_steps) = match decision {
            CoverageDecision::Covered => (
                vec!["Keep the product and its accessories together until the claim is resolved".to_string()],
                vec![
                    "Submit a warranty claim with a description of the fault".to_string(),
                    "Attach photos or a short video showing the issue".to_string(),
                ],
            ),
            CoverageDecision::Excluded => (
                vec![format!("{issue} is not covered by the manufacturer warranty")],
                vec![
                    "Request a paid repair quote from an authorized service center".to_string(),
                    "Check whether your home or device insurance covers accidental damage".to_string(),
                ],
            ),
            CoverageDecision::AssessmentRequired => (
                vec!["A technician needs to inspect the product before coverage is decided".to_string()],
                vec![
                    "Submit a claim so the product can be assessed".to_string(),
                    "Include as much detail about the issue as possible".to_string(),
                ],
            ),
            CoverageDecision::WarrantyInactive => (
                vec![if window.is_expired {
                    "The warranty period has ended".to_string()
                } else {
                    "The warranty has not been registered or is already claimed".to_string()
                }],
                vec!["Request a paid repair quote from an authorized service center".to_string()],
            ),
        };

        Assessment {
            issue,
            decision,
            estimated_cost,
            recommendations,
            next_steps,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use warranty_core::{BarcodeStatus, ProductId};

    fn window(can_claim: bool, is_expired: bool) -> WarrantyWindow {
        WarrantyWindow {
            status: if is_expired { BarcodeStatus::Expired } else { BarcodeStatus::Active },
            activated_at: None,
            expires_at: None,
            is_expired,
            days_remaining: if is_expired { 0 } else { 300 },
            can_claim,
            warranty_period: "1 year".to_string(),
            warranty_period_months: 12,
        }
    }

    fn product() -> ProductInfo {
        ProductInfo {
            id: ProductId::new(7),
            name: "Kettle".to_string(),
            sku: "KT-1".to_string(),
            brand: None,
            category: None,
            description: None,
            base_price: Money::from_major(200),
            image_url: None,
        }
    }

    #[test]
    fn faults_are_covered_while_claimable() {
        let policy = StandardCoveragePolicy::default();
        let assessment = policy.assess(&window(true, false), IssueCategory::Battery, Some(&product()));
        assert!(assessment.covered());
        assert_eq!(assessment.estimated_cost, Money::ZERO);
        assert!(!assessment.next_steps.is_empty());
    }

    #[test]
    fn damage_is_priced_from_base_price() {
        let policy = StandardCoveragePolicy::default();
        let live = window(true, false);

        let physical = policy.assess(&live, IssueCategory::PhysicalDamage, Some(&product()));
        assert_eq!(physical.decision, CoverageDecision::Excluded);
        assert_eq!(physical.estimated_cost, Money::from_major(80));

        let water = policy.assess(&live, IssueCategory::WaterDamage, Some(&product()));
        assert_eq!(water.estimated_cost, Money::from_major(120));

        let other = policy.assess(&live, IssueCategory::Other, Some(&product()));
        assert_eq!(other.decision, CoverageDecision::AssessmentRequired);
        assert!(!other.covered());
        assert_eq!(other.estimated_cost, Money::from_major(50));
    }

    #[test]
    fn lapsed_warranties_cover_nothing() {
        let policy = StandardCoveragePolicy::default();
        let assessment = policy.assess(&window(false, true), IssueCategory::Hardware, Some(&product()));
        assert_eq!(assessment.decision, CoverageDecision::WarrantyInactive);
        assert_eq!(assessment.estimated_cost, Money::from_major(100));

        let summary = policy.summary(&window(false, true));
        assert!(!summary.active);
        assert_eq!(summary.covered_issues.len(), 6);
        assert_eq!(summary.excluded_issues, vec![IssueCategory::PhysicalDamage, IssueCategory::WaterDamage]);
    }

    #[test]
    fn unknown_products_estimate_zero() {
        let policy = StandardCoveragePolicy::default();
        let assessment = policy.assess(&window(true, false), IssueCategory::WaterDamage, None);
        assert_eq!(assessment.estimated_cost, Money::ZERO);
    }
}
