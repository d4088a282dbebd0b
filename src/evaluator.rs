use std::sync::Arc;

use crate::{
    configuration_store::{Configuration, ConfigurationStore},
    datafile::Variation,
    Attributes, DecideOptions, DecisionService, Error, EvaluatorConfig, ExperimentDecision,
    FeatureDecision, Result,
};

/// Decision entry point for hosts.
///
/// Holds the current configuration snapshot and a [`DecisionService`]. The snapshot can be
/// replaced at any time from any thread; every decision runs against the snapshot that was
/// current when it started.
///
/// # Examples
/// ```
/// # use feature_decide::{EvaluatorConfig, Evaluator};
/// let evaluator = Evaluator::new(EvaluatorConfig::new());
/// evaluator
///     .publish_datafile(r#"{"version": "4", "revision": "1"}"#)
///     .unwrap();
/// ```
pub struct Evaluator {
    configuration_store: Arc<ConfigurationStore>,
    decision_service: DecisionService,
    default_options: DecideOptions,
}

impl Evaluator {
    /// Create a new `Evaluator` using the specified configuration.
    pub fn new(config: EvaluatorConfig) -> Self {
        Self::new_with_configuration_store(config, Arc::new(ConfigurationStore::new()))
    }

    /// Create an `Evaluator` reading snapshots from a store shared with the host.
    pub fn new_with_configuration_store(
        config: EvaluatorConfig,
        configuration_store: Arc<ConfigurationStore>,
    ) -> Self {
        Evaluator {
            configuration_store,
            decision_service: DecisionService::new(config.user_profile_service),
            default_options: config.default_options,
        }
    }

    /// Current snapshot, if one has been published.
    pub fn configuration(&self) -> Option<Arc<Configuration>> {
        self.configuration_store.get_configuration()
    }

    /// Replace the current snapshot.
    pub fn set_configuration(&self, configuration: Configuration) {
        self.configuration_store.set_configuration(configuration);
    }

    /// Parse `json` and publish it as the current snapshot.
    ///
    /// On error the previous snapshot stays in place.
    pub fn publish_datafile(&self, json: &str) -> Result<()> {
        let configuration = Configuration::from_datafile(json)?;
        self.set_configuration(configuration);
        Ok(())
    }

    /// Decide `experiment_key` for `user_id` with the default options.
    pub fn decide_experiment(
        &self,
        experiment_key: &str,
        user_id: &str,
        attributes: &Attributes,
    ) -> Result<ExperimentDecision> {
        self.decide_experiment_with_options(
            experiment_key,
            user_id,
            attributes,
            &self.default_options,
        )
    }

    /// Decide `experiment_key` for `user_id` with explicit `options`.
    pub fn decide_experiment_with_options(
        &self,
        experiment_key: &str,
        user_id: &str,
        attributes: &Attributes,
        options: &DecideOptions,
    ) -> Result<ExperimentDecision> {
        let Some(configuration) = self.configuration_store.get_configuration() else {
            log::warn!(target: "feature_decide", experiment_key, user_id; "deciding an experiment before a datafile has been published");
            return Err(Error::ConfigurationMissing);
        };

        self.decision_service
            .decide_experiment(
                &configuration.project_config,
                experiment_key,
                user_id,
                attributes,
                options,
            )
            .inspect_err(|err| {
                log::warn!(target: "feature_decide",
                    experiment_key,
                    user_id,
                    attributes:serde;
                    "error occurred while deciding an experiment: {:?}", err,
                );
            })
    }

    /// Decide `flag_key` for `user_id` with the default options.
    pub fn decide_feature(
        &self,
        flag_key: &str,
        user_id: &str,
        attributes: &Attributes,
    ) -> Result<FeatureDecision> {
        self.decide_feature_with_options(flag_key, user_id, attributes, &self.default_options)
    }

    /// Decide `flag_key` for `user_id` with explicit `options`.
    pub fn decide_feature_with_options(
        &self,
        flag_key: &str,
        user_id: &str,
        attributes: &Attributes,
        options: &DecideOptions,
    ) -> Result<FeatureDecision> {
        let Some(configuration) = self.configuration_store.get_configuration() else {
            log::warn!(target: "feature_decide", flag_key, user_id; "deciding a feature before a datafile has been published");
            return Err(Error::ConfigurationMissing);
        };

        self.decision_service
            .decide_feature(
                &configuration.project_config,
                flag_key,
                user_id,
                attributes,
                options,
            )
            .inspect_err(|err| {
                log::warn!(target: "feature_decide",
                    flag_key,
                    user_id,
                    attributes:serde;
                    "error occurred while deciding a feature: {:?}", err,
                );
            })
    }

    /// Shorthand for [`FeatureDecision::is_feature_enabled`]. Errors read as disabled.
    pub fn is_feature_enabled(&self, flag_key: &str, user_id: &str, attributes: &Attributes) -> bool {
        self.decide_feature(flag_key, user_id, attributes)
            .is_ok_and(|decision| decision.is_feature_enabled())
    }

    /// Force `user_id` into `variation_key`, or clear the override with `None`.
    ///
    /// Keys are resolved against the current snapshot.
    pub fn set_forced_variation(
        &self,
        experiment_key: &str,
        user_id: &str,
        variation_key: Option<&str>,
    ) -> Result<()> {
        let configuration = self
            .configuration_store
            .get_configuration()
            .ok_or(Error::ConfigurationMissing)?;
        self.decision_service.forced_variations().set_forced_variation(
            &configuration.project_config,
            experiment_key,
            user_id,
            variation_key,
        )
    }

    /// Forced variation of `user_id` in `experiment_key`, if any.
    pub fn get_forced_variation(&self, experiment_key: &str, user_id: &str) -> Option<Variation> {
        let configuration = self.configuration_store.get_configuration()?;
        self.decision_service
            .forced_variations()
            .get_forced_variation(&configuration.project_config, experiment_key, user_id)
            .cloned()
    }
}

#[cfg(test)]
mod tests {
    use std::{collections::HashMap, sync::Arc};

    use crate::{
        configuration_store::{Configuration, ConfigurationStore},
        AttributeValue, Attributes, DecideOptions, DecisionSource, Error, Evaluator,
        EvaluatorConfig, InMemoryUserProfileService, UserProfileService,
    };

    fn datafile() -> String {
        std::fs::read_to_string("tests/data/datafile.json")
            .expect("Failed to open tests/data/datafile.json")
    }

    fn us() -> Attributes {
        [("country".to_owned(), AttributeValue::from("us"))].into()
    }

    #[test]
    fn returns_error_while_no_configuration() {
        let evaluator = EvaluatorConfig::new().to_evaluator();

        assert!(matches!(
            evaluator.decide_experiment("checkout_test", "user", &HashMap::new()),
            Err(Error::ConfigurationMissing)
        ));
        assert!(matches!(
            evaluator.decide_feature("new_checkout", "user", &HashMap::new()),
            Err(Error::ConfigurationMissing)
        ));
        assert!(matches!(
            evaluator.set_forced_variation("checkout_test", "user", Some("control")),
            Err(Error::ConfigurationMissing)
        ));
        assert!(!evaluator.is_feature_enabled("new_checkout", "user", &HashMap::new()));
    }

    #[test]
    fn decides_once_configuration_is_published() {
        let configuration_store = Arc::new(ConfigurationStore::new());
        let evaluator = Evaluator::new_with_configuration_store(
            EvaluatorConfig::new(),
            configuration_store.clone(),
        );

        // publishing after the evaluator is created
        configuration_store.set_configuration(Configuration::from_datafile(&datafile()).unwrap());

        let decision = evaluator
            .decide_experiment("checkout_test", "whitelisted_user", &HashMap::new())
            .unwrap();
        assert_eq!(decision.variation_key(), Some("treatment"));

        let decision = evaluator
            .decide_feature(
                "new_checkout",
                "user",
                &[("age".to_owned(), AttributeValue::from(35))].into(),
            )
            .unwrap();
        assert_eq!(decision.source, DecisionSource::Rollout);
        assert_eq!(decision.variation_key(), Some("middle"));
    }

    #[test]
    fn failed_publish_keeps_previous_snapshot() {
        let evaluator = EvaluatorConfig::new().to_evaluator();
        evaluator.publish_datafile(&datafile()).unwrap();

        assert!(matches!(
            evaluator.publish_datafile(r#"{"version": "1"}"#),
            Err(Error::UnsupportedDatafileVersion(_))
        ));
        assert!(matches!(
            evaluator.publish_datafile("not json"),
            Err(Error::DatafileParseError(_))
        ));
        assert_eq!(
            evaluator.configuration().unwrap().project_config.revision(),
            "241"
        );
    }

    #[test]
    fn forced_variations_go_through_evaluator() {
        let evaluator = EvaluatorConfig::new().to_evaluator();
        evaluator.publish_datafile(&datafile()).unwrap();

        evaluator
            .set_forced_variation("checkout_test", "user", Some("control"))
            .unwrap();
        assert_eq!(
            evaluator
                .get_forced_variation("checkout_test", "user")
                .map(|variation| variation.key),
            Some("control".to_owned())
        );
        assert_eq!(
            evaluator
                .decide_experiment("checkout_test", "user", &HashMap::new())
                .unwrap()
                .variation_key(),
            Some("control")
        );

        evaluator
            .set_forced_variation("checkout_test", "user", None)
            .unwrap();
        assert_eq!(evaluator.get_forced_variation("checkout_test", "user"), None);
    }

    #[test]
    fn default_options_apply_to_every_call() {
        let profiles = Arc::new(InMemoryUserProfileService::new());
        let mut config = EvaluatorConfig::new();
        config
            .shared_user_profile_service(profiles.clone())
            .default_options(DecideOptions {
                include_reasons: true,
                ignore_user_profile: true,
            });
        let evaluator = config.to_evaluator();
        evaluator.publish_datafile(&datafile()).unwrap();

        let decision = evaluator
            .decide_experiment("checkout_test", "user", &us())
            .unwrap();
        assert!(decision.variation.is_some());
        assert!(!decision.reasons.is_empty());
        assert_eq!(profiles.lookup("user", "2001"), None);

        let decision = evaluator
            .decide_experiment_with_options(
                "checkout_test",
                "user",
                &us(),
                &DecideOptions::default(),
            )
            .unwrap();
        assert!(decision.reasons.is_empty());
        assert_eq!(
            profiles.lookup("user", "2001"),
            decision.variation.map(|variation| variation.id)
        );
    }

    #[test]
    fn unknown_keys_are_errors() {
        let evaluator = EvaluatorConfig::new().to_evaluator();
        evaluator.publish_datafile(&datafile()).unwrap();

        assert!(matches!(
            evaluator.decide_experiment("missing", "user", &HashMap::new()),
            Err(Error::ExperimentNotFound(_))
        ));
        assert!(matches!(
            evaluator.decide_feature("missing", "user", &HashMap::new()),
            Err(Error::FeatureFlagNotFound(_))
        ));
    }
}
