//! Reusable value validators
//!
//! A validator is a predicate over a coerced value. Validators never see a
//! value of the wrong type; a predicate handed one anyway returns `false`.

use std::sync::Arc;

use crate::value::VarValue;

/// Predicate over a variable value
pub type Validator = Arc<dyn Fn(&VarValue) -> bool + Send + Sync>;

/// Regions deployments may target
pub const SUPPORTED_REGIONS: [&str; 10] = [
    "us-east-1",
    "us-east-2",
    "us-west-1",
    "us-west-2",
    "eu-west-1",
    "eu-west-2",
    "eu-central-1",
    "ap-northeast-1",
    "ap-southeast-1",
    "ap-southeast-2",
];

/// Accelerated instance families deployments may request
pub const SUPPORTED_FAMILIES: [&str; 5] = ["g4dn", "g4ad", "g5", "g5g", "p3"];

/// Spot bid ceiling bounds (USD/hour)
pub const MIN_SPOT_PRICE: f64 = 0.10;
/// Spot bid ceiling bounds (USD/hour)
pub const MAX_SPOT_PRICE: f64 = 50.00;

/// 3-30 characters, starts with a letter, letters/digits/hyphens only
pub fn is_valid_stack_name(name: &str) -> bool {
    let len = name.len();
    (3..=30).contains(&len)
        && name.starts_with(|c: char| c.is_ascii_alphabetic())
        && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
}

/// One of the known regions
pub fn is_supported_region(region: &str) -> bool {
    SUPPORTED_REGIONS.contains(&region)
}

/// `auto` or `<family>.<size>` for a supported family
pub fn is_supported_instance_class(class: &str) -> bool {
    if class == "auto" {
        return true;
    }
    match class.split_once('.') {
        Some((family, size)) => {
            SUPPORTED_FAMILIES.contains(&family)
                && !size.is_empty()
                && size.chars().all(|c| c.is_ascii_alphanumeric())
        }
        None => false,
    }
}

/// Inside the accepted spot price range
pub fn is_valid_spot_price(price: f64) -> bool {
    (MIN_SPOT_PRICE..=MAX_SPOT_PRICE).contains(&price)
}

fn string_check(check: impl Fn(&str) -> bool + Send + Sync + 'static) -> Validator {
    Arc::new(move |value: &VarValue| value.as_str().map(|s| check(s)).unwrap_or(false))
}

/// Stack name validator
pub fn stack_name() -> Validator {
    string_check(is_valid_stack_name)
}

/// Supported region validator
pub fn region() -> Validator {
    string_check(is_supported_region)
}

/// Supported instance class validator
pub fn instance_class() -> Validator {
    string_check(is_supported_instance_class)
}

/// Spot price ceiling, given as a decimal string
pub fn spot_price() -> Validator {
    string_check(|s| s.trim().parse::<f64>().map(is_valid_spot_price).unwrap_or(false))
}

/// Decimal string within `[min, max]`
pub fn float_range(min: f64, max: f64) -> Validator {
    string_check(move |s| {
        s.trim()
            .parse::<f64>()
            .map(|v| (min..=max).contains(&v))
            .unwrap_or(false)
    })
}

/// String equal to one of `allowed`
pub fn one_of(allowed: &[&str]) -> Validator {
    let allowed: Vec<String> = allowed.iter().map(|s| s.to_string()).collect();
    string_check(move |s| allowed.iter().any(|a| a == s))
}

/// Integer within `[min, max]`
pub fn int_range(min: i64, max: i64) -> Validator {
    Arc::new(move |value: &VarValue| value.as_int().map(|i| (min..=max).contains(&i)).unwrap_or(false))
}

/// Non-blank string or non-empty list
pub fn non_empty() -> Validator {
    Arc::new(|value: &VarValue| match value {
        VarValue::String(s) => !s.trim().is_empty(),
        VarValue::StringList(items) => !items.is_empty(),
        _ => true,
    })
}

/// Every list item passes `item`
pub fn list_of(item: Validator) -> Validator {
    Arc::new(move |value: &VarValue| match value {
        VarValue::StringList(items) => items
            .iter()
            .all(|s| item(&VarValue::String(s.clone()))),
        _ => false,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stack_names() {
        assert!(is_valid_stack_name("ml-prod-01"));
        assert!(is_valid_stack_name("abc"));
        assert!(!is_valid_stack_name("ab"));
        assert!(!is_valid_stack_name("1stack"));
        assert!(!is_valid_stack_name("my_stack"));
        assert!(!is_valid_stack_name(&"a".repeat(31)));
    }

    #[test]
    fn test_instance_classes() {
        assert!(is_supported_instance_class("g4dn.xlarge"));
        assert!(is_supported_instance_class("p3.2xlarge"));
        assert!(is_supported_instance_class("auto"));
        assert!(!is_supported_instance_class("t3.micro"));
        assert!(!is_supported_instance_class("g5."));
        assert!(!is_supported_instance_class("g5"));
    }

    #[test]
    fn test_spot_price_bounds() {
        let v = spot_price();
        assert!(v(&VarValue::from("0.10")));
        assert!(v(&VarValue::from("50")));
        assert!(!v(&VarValue::from("0.05")));
        assert!(!v(&VarValue::from("cheap")));
        assert!(!v(&VarValue::Int(1)));
    }

    #[test]
    fn test_combinators() {
        let env = one_of(&["development", "staging", "production"]);
        assert!(env(&VarValue::from("staging")));
        assert!(!env(&VarValue::from("qa")));

        let fleet = int_range(1, 20);
        assert!(fleet(&VarValue::Int(20)));
        assert!(!fleet(&VarValue::Int(0)));

        let regions = list_of(region());
        assert!(regions(&VarValue::from(&["us-east-1", "eu-west-1"][..])));
        assert!(!regions(&VarValue::from(&["us-east-1", "mars-1"][..])));

        assert!(!non_empty()(&VarValue::from("  ")));
        assert!(non_empty()(&VarValue::from(&["x"][..])));
    }
}
