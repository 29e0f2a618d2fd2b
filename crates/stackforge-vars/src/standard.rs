//! Standard deployment variables

use crate::error::Result;
use crate::store::{VariableDecl, VariableStore};
use crate::validators;
use crate::value::{Scope, VarType};

/// Names of the standard variables
pub mod names {
    /// Stack name
    pub const STACK_NAME: &str = "stack_name";
    /// Primary region
    pub const REGION: &str = "region";
    /// Environment label
    pub const ENVIRONMENT: &str = "environment";
    /// Deployment type
    pub const DEPLOYMENT_TYPE: &str = "deployment_type";
    /// Preferred instance class
    pub const INSTANCE_CLASS: &str = "instance_class";
    /// Classes tried after the preferred one
    pub const FALLBACK_INSTANCE_CLASSES: &str = "fallback_instance_classes";
    /// Regions tried after the primary
    pub const FALLBACK_REGIONS: &str = "fallback_regions";
    /// Spot bid ceiling, USD/hour
    pub const MAX_SPOT_PRICE: &str = "max_spot_price";
    /// Lowest acceptable capacity confidence
    pub const MIN_CAPACITY_CONFIDENCE: &str = "min_capacity_confidence";
    /// Provision a CDN
    pub const ENABLE_CDN: &str = "enable_cdn";
    /// Provision monitoring
    pub const ENABLE_MONITORING: &str = "enable_monitoring";
    /// Compute instances to launch
    pub const FLEET_SIZE: &str = "fleet_size";
    /// HTTP path for health checks
    pub const HEALTH_CHECK_PATH: &str = "health_check_path";
}

/// Environments a stack may be deployed into
pub const ENVIRONMENTS: [&str; 3] = ["development", "staging", "production"];

/// Deployment types
pub const DEPLOYMENT_TYPES: [&str; 4] = ["spot", "alb", "cdn", "full"];

/// Declare the variables every deployment reads
pub fn register_deployment_variables(store: &VariableStore) -> Result<()> {
    let decls = [
        VariableDecl::new(names::STACK_NAME, VarType::String)
            .scope(Scope::Stack)
            .validator(validators::stack_name())
            .description("Stack name (3-30 chars, starts with a letter)"),
        VariableDecl::new(names::REGION, VarType::String)
            .scope(Scope::Stack)
            .default_value("us-east-1")
            .validator(validators::region())
            .description("Primary deployment region"),
        VariableDecl::new(names::ENVIRONMENT, VarType::String)
            .scope(Scope::Stack)
            .default_value("development")
            .validator(validators::one_of(&ENVIRONMENTS))
            .description("Target environment"),
        VariableDecl::new(names::DEPLOYMENT_TYPE, VarType::String)
            .scope(Scope::Stack)
            .default_value("spot")
            .validator(validators::one_of(&DEPLOYMENT_TYPES))
            .description("Resource plan: spot, alb, cdn or full"),
        VariableDecl::new(names::INSTANCE_CLASS, VarType::String)
            .scope(Scope::Stack)
            .default_value("g4dn.xlarge")
            .validator(validators::instance_class())
            .description("Preferred compute instance class"),
        VariableDecl::new(names::FALLBACK_INSTANCE_CLASSES, VarType::StringList)
            .scope(Scope::Stack)
            .default_value(vec!["g4dn.2xlarge".to_string(), "g5.xlarge".to_string(), "g4ad.xlarge".to_string()])
            .validator(validators::list_of(validators::instance_class()))
            .description("Instance classes tried when the preferred one has no capacity"),
        VariableDecl::new(names::FALLBACK_REGIONS, VarType::StringList)
            .scope(Scope::Stack)
            .default_value(vec!["us-west-2".to_string(), "eu-west-1".to_string()])
            .validator(validators::list_of(validators::region()))
            .description("Regions searched after the primary region"),
        VariableDecl::new(names::MAX_SPOT_PRICE, VarType::String)
            .default_value("2.00")
            .validator(validators::spot_price())
            .description("Spot bid ceiling in USD/hour"),
        VariableDecl::new(names::MIN_CAPACITY_CONFIDENCE, VarType::String)
            .default_value("0.7")
            .validator(validators::float_range(0.0, 1.0))
            .description("Minimum capacity confidence for a spot placement"),
        VariableDecl::new(names::ENABLE_CDN, VarType::Bool)
            .scope(Scope::Stack)
            .default_value(false)
            .description("Front the load balancer with a CDN distribution"),
        VariableDecl::new(names::ENABLE_MONITORING, VarType::Bool)
            .scope(Scope::Stack)
            .default_value(false)
            .description("Provision a monitoring dashboard"),
        VariableDecl::new(names::FLEET_SIZE, VarType::Int)
            .scope(Scope::Stack)
            .default_value(1)
            .validator(validators::int_range(1, 20))
            .description("Number of compute placements"),
        VariableDecl::new(names::HEALTH_CHECK_PATH, VarType::String)
            .scope(Scope::Stack)
            .default_value("/health")
            .validator(std::sync::Arc::new(|v: &crate::VarValue| {
                v.as_str().map(|p| p.starts_with('/')).unwrap_or(false)
            }))
            .description("HTTP path probed during health validation"),
    ];

    for decl in decls {
        store.register(decl)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::VariableError;

    #[test]
    fn test_standard_defaults() {
        let store = VariableStore::new();
        register_deployment_variables(&store).unwrap();

        assert_eq!(store.get_string(names::REGION, Scope::Stack).unwrap(), "us-east-1");
        assert_eq!(store.get_int(names::FLEET_SIZE, Scope::Stack).unwrap(), 1);
        assert!(!store.get_bool(names::ENABLE_CDN, Scope::Stack).unwrap());
        assert_eq!(
            store.get_list(names::FALLBACK_REGIONS, Scope::Stack).unwrap(),
            vec!["us-west-2", "eu-west-1"]
        );
        assert!(matches!(
            store.get(names::STACK_NAME, Scope::Stack),
            Err(VariableError::Unset(_))
        ));
    }

    #[test]
    fn test_standard_validation() {
        let store = VariableStore::new();
        register_deployment_variables(&store).unwrap();

        assert!(store.set(names::STACK_NAME, "ml-inference", Scope::Stack).is_ok());
        assert!(store.set(names::STACK_NAME, "9lives", Scope::Stack).is_err());
        assert!(store.set(names::REGION, "sa-east-1", Scope::Stack).is_err());
        assert!(store.set(names::ENVIRONMENT, "qa", Scope::Stack).is_err());
        assert!(store.set(names::MAX_SPOT_PRICE, "0.01", Scope::Global).is_err());
        assert!(store.set(names::HEALTH_CHECK_PATH, "health", Scope::Stack).is_err());
        assert!(store.set(names::ENABLE_CDN, "yes", Scope::Stack).is_ok());
        assert!(store.get_bool(names::ENABLE_CDN, Scope::Stack).unwrap());

        // Global-declared knobs cannot be overridden per stack
        assert!(matches!(
            store.set(names::MAX_SPOT_PRICE, "1.00", Scope::Stack),
            Err(VariableError::ScopeViolation { .. })
        ));
    }

    #[test]
    fn test_registration_is_once_only() {
        let store = VariableStore::new();
        register_deployment_variables(&store).unwrap();
        assert!(register_deployment_variables(&store).is_err());
    }
}
