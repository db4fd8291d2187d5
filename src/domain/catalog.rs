use {
    super::error::PipelineError,
    super::subscription::Plan,
    std::collections::HashMap,
};

pub const DEFAULT_TRIAL_DAYS: u32 = 7;

/// Maps store product identifiers to plans.
///
/// Explicit overrides win; otherwise the plan is inferred from the
/// product id (`lifetime_subscription`, `com.app.pro.yearly`, ...).
#[derive(Debug, Clone)]
pub struct ProductCatalog {
    overrides: HashMap<String, Plan>,
    trial_days: u32,
}

impl Default for ProductCatalog {
    fn default() -> Self {
        Self {
            overrides: HashMap::new(),
            trial_days: DEFAULT_TRIAL_DAYS,
        }
    }
}

impl ProductCatalog {
    pub fn new(overrides: HashMap<String, Plan>, trial_days: u32) -> Self {
        Self {
            overrides,
            trial_days,
        }
    }

    /// Parse `product=plan,product=plan`.
    pub fn parse_overrides(raw: &str) -> Result<HashMap<String, Plan>, PipelineError> {
        raw.split(',')
            .map(str::trim)
            .filter(|entry| !entry.is_empty())
            .map(|entry| {
                let (product, plan) = entry.split_once('=').ok_or_else(|| {
                    PipelineError::Validation(format!("expected product=plan, got: {entry}"))
                })?;
                let plan = Plan::try_from(plan.trim())?;
                if plan == Plan::None {
                    return Err(PipelineError::Validation(format!(
                        "product {product} cannot map to plan none"
                    )));
                }
                Ok((product.trim().to_string(), plan))
            })
            .collect()
    }

    pub fn trial_days(&self) -> u32 {
        self.trial_days
    }

    pub fn plan_for(&self, product_id: &str) -> Option<Plan> {
        if let Some(plan) = self.overrides.get(product_id) {
            return Some(*plan);
        }
        let id = product_id.to_ascii_lowercase();
        if id.contains("lifetime") {
            Some(Plan::Lifetime)
        } else if id.contains("year") || id.contains("annual") {
            Some(Plan::Yearly)
        } else if id.contains("month") {
            Some(Plan::Monthly)
        } else {
            None
        }
    }

    pub fn signals_trial(&self, product_id: &str) -> bool {
        product_id.to_ascii_lowercase().contains("trial")
    }
}
