//! Built-in attribute catalog for unsecured consumer lending.

use super::{AttributeDef, AttributeKind};

pub(super) const BUILTIN_VERSION: &str = "builtin-1";

pub(super) fn attributes() -> Vec<AttributeDef> {
    use AttributeKind::*;

    vec![
        AttributeDef::new("is_existing_customer", "Existing customer", Boolean),
        AttributeDef::new("bureau_file_status", "Bureau file status", Categorical)
            .with_categories(["thin", "standard", "thick"]),
        AttributeDef::new("credit_score", "Credit score", Numeric),
        AttributeDef::new("dti_ratio", "Debt-to-income ratio", Numeric),
        AttributeDef::new("monthly_income", "Monthly income", Numeric),
        AttributeDef::new("employment_type", "Employment type", Categorical).with_categories([
            "salaried",
            "self_employed",
            "contract",
            "retired",
            "unemployed",
        ]),
        AttributeDef::new("loan_amount", "Requested amount", Numeric),
        AttributeDef::new("loan_term_months", "Term (months)", Numeric),
        AttributeDef::new("age", "Applicant age", Numeric),
        AttributeDef::new("residency_status", "Residency status", Categorical).with_categories([
            "citizen",
            "permanent_resident",
            "temporary_resident",
            "non_resident",
        ]),
        AttributeDef::new("has_bankruptcy", "Prior bankruptcy", Boolean),
        AttributeDef::new("application_channel", "Application channel", Categorical)
            .with_categories(["branch", "online", "broker", "mobile"]),
    ]
}
