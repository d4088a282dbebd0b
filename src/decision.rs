//! Decision resolution for experiments and feature flags.
//!
//! An experiment decision walks the following steps, stopping at the first one that produces a
//! variation or rules the user out:
//!
//! 1. Forced variations (host override table, then the experiment whitelist).
//! 2. Sticky variation from the [`UserProfileService`].
//! 3. Status: only running experiments bucket users.
//! 4. Audience gate.
//! 5. Group mutual exclusion and bucketing (see [`Bucketer`]).
//!
//! A feature decision tries the feature's experiments in order and then cascades through the
//! rules of its rollout.
use std::sync::Arc;

use derive_more::Display;

use crate::{
    bucketer::{bucketing_id, Bucketer},
    datafile::{Experiment, FeatureFlag, Variation},
    forced_variations::ForcedVariations,
    reasons::{DecisionReasons, EvaluationKind, Reason},
    sharder::{Murmur3Sharder, Sharder},
    user_profile::{NoopUserProfileService, UserProfileService},
    Attributes, Error, ProjectConfig, Result,
};

/// Per-call decision options.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DecideOptions {
    /// Record informational reasons, not only configuration errors.
    pub include_reasons: bool,
    /// Neither read nor write sticky variations.
    pub ignore_user_profile: bool,
}

/// Where a feature decision came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum DecisionSource {
    /// One of the flag's experiments.
    #[display("feature-test")]
    FeatureTest,
    /// A rule of the flag's rollout.
    #[display("rollout")]
    Rollout,
    /// No decision.
    #[display("none")]
    None,
}

/// Result of [`DecisionService::decide_experiment`].
#[derive(Debug, Clone, PartialEq)]
pub struct ExperimentDecision {
    /// `None` means the user is not in the experiment.
    pub variation: Option<Variation>,
    /// Reason trail of the decision.
    pub reasons: DecisionReasons,
}

impl ExperimentDecision {
    /// Key of the decided variation.
    pub fn variation_key(&self) -> Option<&str> {
        self.variation.as_ref().map(|variation| variation.key.as_str())
    }
}

/// Result of [`DecisionService::decide_feature`].
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureDecision {
    /// The experiment or rollout rule that produced the variation.
    pub experiment: Option<Experiment>,
    /// Decided variation. `None` means the feature is off.
    pub variation: Option<Variation>,
    /// Where the variation came from.
    pub source: DecisionSource,
    /// Reason trail of the decision.
    pub reasons: DecisionReasons,
}

impl FeatureDecision {
    /// A feature without a decision, or whose variation does not set `featureEnabled`, is off.
    pub fn is_feature_enabled(&self) -> bool {
        self.variation
            .as_ref()
            .is_some_and(Variation::is_feature_enabled)
    }

    /// Key of the decided variation.
    pub fn variation_key(&self) -> Option<&str> {
        self.variation.as_ref().map(|variation| variation.key.as_str())
    }
}

/// Borrowed result of [`DecisionService::get_variation_for_feature`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FeatureVariation<'c> {
    /// Experiment or rollout rule that produced the variation.
    pub experiment: Option<&'c Experiment>,
    /// Decided variation.
    pub variation: Option<&'c Variation>,
    /// Where the variation came from.
    pub source: DecisionSource,
}

impl<'c> FeatureVariation<'c> {
    fn none() -> Self {
        FeatureVariation {
            experiment: None,
            variation: None,
            source: DecisionSource::None,
        }
    }
}

/// Resolves decisions against one [`ProjectConfig`] snapshot per call.
///
/// Holds no per-snapshot state, so it may outlive any number of snapshot replacements.
pub struct DecisionService<S = Murmur3Sharder> {
    bucketer: Bucketer<S>,
    forced_variations: ForcedVariations,
    user_profile_service: Arc<dyn UserProfileService + Send + Sync>,
}

impl DecisionService {
    /// Service bucketing with [`Murmur3Sharder`].
    pub fn new(user_profile_service: Arc<dyn UserProfileService + Send + Sync>) -> Self {
        DecisionService::with_sharder(Murmur3Sharder, user_profile_service)
    }
}

impl Default for DecisionService {
    fn default() -> Self {
        DecisionService::new(Arc::new(NoopUserProfileService))
    }
}

impl<S: Sharder> DecisionService<S> {
    /// Service bucketing with a custom [`Sharder`].
    pub fn with_sharder(
        sharder: S,
        user_profile_service: Arc<dyn UserProfileService + Send + Sync>,
    ) -> Self {
        DecisionService {
            bucketer: Bucketer::new(sharder),
            forced_variations: ForcedVariations::new(),
            user_profile_service,
        }
    }

    /// Host override table consulted before any other step.
    pub fn forced_variations(&self) -> &ForcedVariations {
        &self.forced_variations
    }

    /// Decide the variation of `user_id` in the experiment with `experiment_key`.
    pub fn decide_experiment(
        &self,
        config: &ProjectConfig,
        experiment_key: &str,
        user_id: &str,
        attributes: &Attributes,
        options: &DecideOptions,
    ) -> Result<ExperimentDecision> {
        let experiment = config
            .experiment_by_key(experiment_key)
            .ok_or_else(|| Error::ExperimentNotFound(experiment_key.to_owned()))?;

        let mut reasons = DecisionReasons::new(options.include_reasons);
        let variation =
            self.get_variation(config, experiment, user_id, attributes, options, &mut reasons);

        log::trace!(target: "feature_decide",
                    experiment_key,
                    user_id,
                    variation:serde = variation.map(|variation| &variation.key);
                    "decided experiment");

        Ok(ExperimentDecision {
            variation: variation.cloned(),
            reasons,
        })
    }

    /// Decide the feature flag with `flag_key` for `user_id`.
    pub fn decide_feature(
        &self,
        config: &ProjectConfig,
        flag_key: &str,
        user_id: &str,
        attributes: &Attributes,
        options: &DecideOptions,
    ) -> Result<FeatureDecision> {
        let flag = config
            .feature_flag(flag_key)
            .ok_or_else(|| Error::FeatureFlagNotFound(flag_key.to_owned()))?;

        let mut reasons = DecisionReasons::new(options.include_reasons);
        let decision =
            self.get_variation_for_feature(config, flag, user_id, attributes, options, &mut reasons);

        let enabled = decision
            .variation
            .is_some_and(Variation::is_feature_enabled);
        reasons.add(if enabled {
            Reason::FeatureEnabledForUser {
                flag_key: flag_key.to_owned(),
                user_id: user_id.to_owned(),
            }
        } else {
            Reason::FeatureNotEnabledForUser {
                flag_key: flag_key.to_owned(),
                user_id: user_id.to_owned(),
            }
        });

        log::trace!(target: "feature_decide",
                    flag_key,
                    user_id,
                    source:display = decision.source,
                    variation:serde = decision.variation.map(|variation| &variation.key);
                    "decided feature");

        Ok(FeatureDecision {
            experiment: decision.experiment.cloned(),
            variation: decision.variation.cloned(),
            source: decision.source,
            reasons,
        })
    }

    /// Variation of `user_id` in `experiment`, or `None` if the user is not in it.
    pub fn get_variation<'c>(
        &self,
        config: &'c ProjectConfig,
        experiment: &'c Experiment,
        user_id: &str,
        attributes: &Attributes,
        options: &DecideOptions,
        reasons: &mut DecisionReasons,
    ) -> Option<&'c Variation> {
        if let Some(variation) = self.forced_variations.find(experiment, user_id, reasons) {
            return Some(variation);
        }

        if let Some(variation) = whitelisted_variation(experiment, user_id, reasons) {
            return Some(variation);
        }

        if !options.ignore_user_profile {
            if let Some(variation) = self.sticky_variation(experiment, user_id, reasons) {
                return Some(variation);
            }
        }

        if !experiment.is_running() {
            reasons.add(Reason::ExperimentNotRunning {
                experiment_key: experiment.key.clone(),
            });
            return None;
        }

        let admitted = config.audience_resolver().evaluate_experiment_audiences(
            experiment,
            attributes,
            EvaluationKind::Experiment,
            &experiment.key,
            reasons,
        );
        if !admitted {
            reasons.add(Reason::UserNotInExperiment {
                user_id: user_id.to_owned(),
                experiment_key: experiment.key.clone(),
            });
            return None;
        }

        let bucketing_id = bucketing_id(user_id, attributes);
        let Some(variation) =
            self.bucketer
                .bucket_experiment(config, experiment, bucketing_id, reasons)
        else {
            reasons.add(Reason::NotBucketedIntoVariation {
                user_id: user_id.to_owned(),
            });
            return None;
        };

        reasons.add(Reason::BucketedIntoVariation {
            user_id: user_id.to_owned(),
            experiment_key: experiment.key.clone(),
            variation_key: variation.key.clone(),
        });

        if !options.ignore_user_profile {
            self.user_profile_service
                .save(user_id, &experiment.id, &variation.id);
        }

        Some(variation)
    }

    /// Feature experiments first, then the rollout.
    pub fn get_variation_for_feature<'c>(
        &self,
        config: &'c ProjectConfig,
        flag: &'c FeatureFlag,
        user_id: &str,
        attributes: &Attributes,
        options: &DecideOptions,
        reasons: &mut DecisionReasons,
    ) -> FeatureVariation<'c> {
        if flag.experiment_ids.is_empty() {
            reasons.add(Reason::FeatureHasNoExperiments {
                flag_key: flag.key.clone(),
            });
        }

        for experiment_id in &flag.experiment_ids {
            let Some(experiment) = config.experiment_by_id(experiment_id) else {
                log::warn!(target: "feature_decide",
                           flag_key:display = flag.key,
                           experiment_id:display = experiment_id;
                           "feature references an unknown experiment");
                continue;
            };

            if let Some(variation) =
                self.get_variation(config, experiment, user_id, attributes, options, reasons)
            {
                return FeatureVariation {
                    experiment: Some(experiment),
                    variation: Some(variation),
                    source: DecisionSource::FeatureTest,
                };
            }
        }

        self.get_variation_from_rollout(config, flag, user_id, attributes, reasons)
    }

    /// Cascade through the rollout rules of `flag`.
    ///
    /// A rule whose audience or traffic does not admit the user passes on to the next rule.
    /// The last rule is the "everyone else" rule; if it does not bucket the user either, the
    /// feature has no rollout decision.
    pub fn get_variation_from_rollout<'c>(
        &self,
        config: &'c ProjectConfig,
        flag: &'c FeatureFlag,
        user_id: &str,
        attributes: &Attributes,
        reasons: &mut DecisionReasons,
    ) -> FeatureVariation<'c> {
        if flag.rollout_id.is_empty() {
            reasons.add(Reason::NoRolloutExists {
                flag_key: flag.key.clone(),
            });
            return FeatureVariation::none();
        }

        let Some(rollout) = config.rollout(&flag.rollout_id) else {
            reasons.add(Reason::RolloutNotFound {
                rollout_id: flag.rollout_id.clone(),
                flag_key: flag.key.clone(),
            });
            return FeatureVariation::none();
        };

        let Some((everyone_else, rules)) = rollout.experiments.split_last() else {
            reasons.add(Reason::RolloutHasNoRules {
                rollout_id: rollout.id.clone(),
            });
            return FeatureVariation::none();
        };

        let resolver = config.audience_resolver();
        let bucketing_id = bucketing_id(user_id, attributes);

        for (index, rule) in rules.iter().enumerate() {
            let logging_key = (index + 1).to_string();

            if !resolver.evaluate_experiment_audiences(
                rule,
                attributes,
                EvaluationKind::RolloutRule,
                &logging_key,
                reasons,
            ) {
                reasons.add(Reason::DoesNotMeetConditionsForTargetingRule {
                    user_id: user_id.to_owned(),
                    rule: logging_key,
                });
                continue;
            }
            reasons.add(Reason::MeetsConditionsForTargetingRule {
                user_id: user_id.to_owned(),
                rule: logging_key.clone(),
            });

            match self.bucketer.bucket_to_variation(rule, bucketing_id, reasons) {
                Some(variation) => {
                    reasons.add(Reason::BucketedIntoTargetingRule {
                        user_id: user_id.to_owned(),
                        rule: logging_key,
                    });
                    return FeatureVariation {
                        experiment: Some(rule),
                        variation: Some(variation),
                        source: DecisionSource::Rollout,
                    };
                }
                None => {
                    reasons.add(Reason::NotBucketedIntoTargetingRule {
                        user_id: user_id.to_owned(),
                        rule: logging_key,
                    });
                }
            }
        }

        const EVERYONE_ELSE: &str = "Everyone Else";
        if !resolver.evaluate_experiment_audiences(
            everyone_else,
            attributes,
            EvaluationKind::RolloutRule,
            EVERYONE_ELSE,
            reasons,
        ) {
            reasons.add(Reason::DoesNotMeetConditionsForTargetingRule {
                user_id: user_id.to_owned(),
                rule: EVERYONE_ELSE.to_owned(),
            });
            return FeatureVariation::none();
        }

        match self
            .bucketer
            .bucket_to_variation(everyone_else, bucketing_id, reasons)
        {
            Some(variation) => {
                reasons.add(Reason::BucketedIntoEveryoneElseRule {
                    user_id: user_id.to_owned(),
                });
                FeatureVariation {
                    experiment: Some(everyone_else),
                    variation: Some(variation),
                    source: DecisionSource::Rollout,
                }
            }
            None => {
                reasons.add(Reason::NotBucketedIntoTargetingRule {
                    user_id: user_id.to_owned(),
                    rule: EVERYONE_ELSE.to_owned(),
                });
                FeatureVariation::none()
            }
        }
    }

    fn sticky_variation<'c>(
        &self,
        experiment: &'c Experiment,
        user_id: &str,
        reasons: &mut DecisionReasons,
    ) -> Option<&'c Variation> {
        let variation_id = self.user_profile_service.lookup(user_id, &experiment.id)?;

        match experiment.get_variation_by_id(&variation_id) {
            Some(variation) => {
                reasons.add(Reason::VariationFromUserProfile {
                    variation_key: variation.key.clone(),
                    experiment_key: experiment.key.clone(),
                    user_id: user_id.to_owned(),
                });
                Some(variation)
            }
            None => {
                reasons.add(Reason::StoredVariationRemoved {
                    variation_id,
                    experiment_key: experiment.key.clone(),
                    user_id: user_id.to_owned(),
                });
                None
            }
        }
    }
}

/// Variation from the experiment's own `forcedVariations` whitelist.
fn whitelisted_variation<'c>(
    experiment: &'c Experiment,
    user_id: &str,
    reasons: &mut DecisionReasons,
) -> Option<&'c Variation> {
    let variation_key = experiment.forced_variations.get(user_id)?;

    match experiment.get_variation_by_key(variation_key) {
        Some(variation) => {
            reasons.add(Reason::WhitelistedVariationFound {
                variation_key: variation_key.clone(),
                user_id: user_id.to_owned(),
            });
            Some(variation)
        }
        None => {
            reasons.add(Reason::WhitelistedVariationInvalid {
                variation_key: variation_key.clone(),
                user_id: user_id.to_owned(),
            });
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::{DecideOptions, DecisionService, DecisionSource};
    use crate::{
        reasons::{EvaluationKind, Reason},
        user_profile::{InMemoryUserProfileService, UserProfileService},
        AttributeValue, Attributes, Error, ProjectConfig,
    };

    fn load_fixture() -> ProjectConfig {
        let json = std::fs::read_to_string("tests/data/datafile.json")
            .expect("Failed to open tests/data/datafile.json");
        ProjectConfig::from_datafile(&json).unwrap()
    }

    fn attrs(pairs: &[(&str, AttributeValue)]) -> Attributes {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_owned(), v.clone()))
            .collect()
    }

    const VERBOSE: DecideOptions = DecideOptions {
        include_reasons: true,
        ignore_user_profile: false,
    };

    #[test]
    fn forced_variation_skips_audience_gate() {
        let config = load_fixture();
        let service = DecisionService::default();
        let canada = attrs(&[("country", "ca".into())]);

        let decision = service
            .decide_experiment(&config, "checkout_test", "user_ca", &canada, &VERBOSE)
            .unwrap();
        assert_eq!(decision.variation, None);

        service
            .forced_variations()
            .set_forced_variation(&config, "checkout_test", "user_ca", Some("control"))
            .unwrap();
        let decision = service
            .decide_experiment(&config, "checkout_test", "user_ca", &canada, &VERBOSE)
            .unwrap();
        assert_eq!(decision.variation_key(), Some("control"));
        assert_eq!(decision.reasons.codes(), vec!["FORCED_VARIATION_MAPPED"]);
    }

    #[test]
    fn forced_variation_skips_status_gate() {
        let config = load_fixture();
        let service = DecisionService::default();

        let decision = service
            .decide_experiment(&config, "paused_test", "user", &Attributes::new(), &VERBOSE)
            .unwrap();
        assert_eq!(decision.variation, None);
        assert_eq!(decision.reasons.codes(), vec!["EXPERIMENT_NOT_RUNNING"]);

        service
            .forced_variations()
            .set_forced_variation(&config, "paused_test", "user", Some("only"))
            .unwrap();
        let decision = service
            .decide_experiment(&config, "paused_test", "user", &Attributes::new(), &VERBOSE)
            .unwrap();
        assert_eq!(decision.variation_key(), Some("only"));
    }

    #[test]
    fn whitelist() {
        let config = load_fixture();
        let service = DecisionService::default();

        let decision = service
            .decide_experiment(
                &config,
                "checkout_test",
                "whitelisted_user",
                &Attributes::new(),
                &VERBOSE,
            )
            .unwrap();
        assert_eq!(decision.variation_key(), Some("treatment"));
        assert_eq!(decision.reasons.codes(), vec!["WHITELISTED_VARIATION_FOUND"]);

        // Invalid whitelist entries fall through to the regular steps and are always reported.
        let decision = service
            .decide_experiment(
                &config,
                "checkout_test",
                "broken_whitelist",
                &Attributes::new(),
                &DecideOptions::default(),
            )
            .unwrap();
        assert_eq!(decision.variation, None);
        assert_eq!(
            decision.reasons.codes(),
            vec!["WHITELISTED_VARIATION_INVALID"]
        );
    }

    #[test]
    fn sticky_variation_wins_over_audience() {
        let config = load_fixture();
        let profiles = Arc::new(InMemoryUserProfileService::new());
        profiles.save("sticky", "2001", "2102");
        profiles.save("gone", "2001", "9999");
        let service = DecisionService::new(profiles.clone());
        let canada = attrs(&[("country", "ca".into())]);

        let decision = service
            .decide_experiment(&config, "checkout_test", "sticky", &canada, &VERBOSE)
            .unwrap();
        assert_eq!(decision.variation_key(), Some("treatment"));
        assert_eq!(decision.reasons.codes(), vec!["VARIATION_FROM_USER_PROFILE"]);

        let ignoring = DecideOptions {
            ignore_user_profile: true,
            ..VERBOSE
        };
        let decision = service
            .decide_experiment(&config, "checkout_test", "sticky", &canada, &ignoring)
            .unwrap();
        assert_eq!(decision.variation, None);

        let decision = service
            .decide_experiment(&config, "checkout_test", "gone", &canada, &VERBOSE)
            .unwrap();
        assert_eq!(decision.variation, None);
        assert_eq!(
            decision.reasons.codes(),
            vec![
                "STORED_VARIATION_REMOVED",
                "AUDIENCE_EVALUATION_RESULT",
                "AUDIENCE_MISMATCH"
            ]
        );
    }

    #[test]
    fn fresh_bucketing_is_saved_unless_ignored() {
        let config = load_fixture();
        let profiles = Arc::new(InMemoryUserProfileService::new());
        let service = DecisionService::new(profiles.clone());
        let us = attrs(&[("country", "us".into())]);

        let decision = service
            .decide_experiment(&config, "checkout_test", "us_user", &us, &VERBOSE)
            .unwrap();
        let variation = decision.variation.expect("us users are always bucketed");
        assert_eq!(profiles.lookup("us_user", "2001"), Some(variation.id));

        let ignoring = DecideOptions {
            ignore_user_profile: true,
            ..VERBOSE
        };
        let decision = service
            .decide_experiment(&config, "checkout_test", "ignored", &us, &ignoring)
            .unwrap();
        assert!(decision.variation.is_some());
        assert_eq!(profiles.lookup("ignored", "2001"), None);
    }

    #[test]
    fn legacy_audience_ids_are_an_implicit_or() {
        let config = load_fixture();
        let service = DecisionService::default();
        let decide = |attributes: Attributes| {
            service
                .decide_experiment(
                    &config,
                    "legacy_audience_test",
                    "user",
                    &attributes,
                    &VERBOSE,
                )
                .unwrap()
                .variation_key()
                .map(str::to_owned)
        };

        assert_eq!(decide(attrs(&[("browser", "chrome".into())])), Some("on".to_owned()));
        assert_eq!(
            decide(attrs(&[("app_version", "2.1.5".into())])),
            Some("on".to_owned())
        );
        assert_eq!(decide(attrs(&[("browser", "safari".into())])), None);
        assert_eq!(decide(Attributes::new()), None);
    }

    #[test]
    fn group_members_are_mutually_exclusive() {
        let config = load_fixture();
        let service = DecisionService::default();

        for n in 0..200 {
            let user_id = format!("user_{n}");
            let in_experiment = |key: &str| {
                service
                    .decide_experiment(&config, key, &user_id, &Attributes::new(), &VERBOSE)
                    .unwrap()
                    .variation
                    .is_some()
            };
            assert!(
                in_experiment("mutex_a") ^ in_experiment("mutex_b"),
                "{user_id}"
            );
        }
    }

    #[test]
    fn rollout_cascade_stops_at_first_matching_rule() {
        let config = load_fixture();
        let service = DecisionService::default();

        let decision = service
            .decide_feature(
                &config,
                "new_checkout",
                "user",
                &attrs(&[("age", 35.into())]),
                &VERBOSE,
            )
            .unwrap();
        assert_eq!(decision.variation_key(), Some("middle"));
        assert_eq!(decision.source, DecisionSource::Rollout);
        assert_eq!(
            decision.experiment.as_ref().map(|rule| rule.key.as_str()),
            Some("rule_under_40")
        );
        assert!(decision.is_feature_enabled());

        let reasons = decision.reasons.reasons();
        assert!(reasons.contains(&Reason::DoesNotMeetConditionsForTargetingRule {
            user_id: "user".to_owned(),
            rule: "1".to_owned(),
        }));
        assert!(reasons.contains(&Reason::BucketedIntoTargetingRule {
            user_id: "user".to_owned(),
            rule: "2".to_owned(),
        }));
        assert!(!reasons.iter().any(|reason| matches!(
            reason,
            Reason::AudienceEvaluationResult { kind: EvaluationKind::RolloutRule, logging_key, .. }
                if logging_key == "Everyone Else"
        )));
    }

    #[test]
    fn rollout_rules_by_age() {
        let config = load_fixture();
        let service = DecisionService::default();
        let decide = |attributes: Attributes| {
            service
                .decide_feature(&config, "new_checkout", "user", &attributes, &VERBOSE)
                .unwrap()
        };

        assert_eq!(
            decide(attrs(&[("age", 25.into())])).variation_key(),
            Some("young")
        );

        let everyone = decide(attrs(&[("age", 50.into())]));
        assert_eq!(everyone.variation_key(), Some("everyone"));
        assert!(!everyone.is_feature_enabled());

        // Unknown rule audiences fall through to the everyone else rule.
        let unknown = decide(attrs(&[("age", "old".into())]));
        assert_eq!(unknown.variation_key(), Some("everyone"));
        assert!(unknown
            .reasons
            .reasons()
            .contains(&Reason::BucketedIntoEveryoneElseRule {
                user_id: "user".to_owned()
            }));
    }

    #[test]
    fn rule_traffic_miss_moves_on_to_the_next_rule() {
        let config = load_fixture();
        let service = DecisionService::default();

        let decision = service
            .decide_feature(
                &config,
                "staged_flag",
                "user",
                &attrs(&[("country", "us".into())]),
                &VERBOSE,
            )
            .unwrap();
        assert_eq!(decision.variation_key(), Some("us"));
        assert_eq!(decision.source, DecisionSource::Rollout);
        assert_eq!(
            decision.experiment.as_ref().map(|rule| rule.key.as_str()),
            Some("us_rule")
        );
        assert!(decision.is_feature_enabled());

        let reasons = decision.reasons.reasons();
        let position = |reason: Reason| reasons.iter().position(|r| *r == reason);
        let skipped = position(Reason::NotBucketedIntoTargetingRule {
            user_id: "user".to_owned(),
            rule: "1".to_owned(),
        });
        let bucketed = position(Reason::BucketedIntoTargetingRule {
            user_id: "user".to_owned(),
            rule: "2".to_owned(),
        });
        assert!(position(Reason::MeetsConditionsForTargetingRule {
            user_id: "user".to_owned(),
            rule: "1".to_owned(),
        })
        .is_some());
        assert!(skipped.is_some() && bucketed.is_some());
        assert!(skipped < bucketed);

        let elsewhere = service
            .decide_feature(
                &config,
                "staged_flag",
                "user",
                &attrs(&[("country", "ca".into())]),
                &VERBOSE,
            )
            .unwrap();
        assert_eq!(elsewhere.variation_key(), Some("fallback"));
        assert!(!elsewhere.is_feature_enabled());
    }

    #[test]
    fn overlapping_group_members_bucket_independently() {
        let config = load_fixture();
        let service = DecisionService::default();

        for n in 0..50 {
            let user_id = format!("user_{n}");
            for (key, variation) in [("overlap_x", "x"), ("overlap_y", "y")] {
                let decision = service
                    .decide_experiment(&config, key, &user_id, &Attributes::new(), &VERBOSE)
                    .unwrap();
                assert_eq!(decision.variation_key(), Some(variation), "{user_id} {key}");
                assert!(!decision.reasons.reasons().iter().any(|reason| matches!(
                    reason,
                    Reason::GroupHasNoTrafficAllocation { .. }
                        | Reason::BucketedIntoExperimentInGroup { .. }
                        | Reason::NotBucketedIntoExperimentInGroup { .. }
                        | Reason::NotBucketedIntoAnyExperimentInGroup { .. }
                )));

                // Only the experiment's own allocation is consulted.
                let bucket_steps = decision
                    .reasons
                    .reasons()
                    .iter()
                    .filter(|reason| matches!(reason, Reason::BucketValueAssigned { .. }))
                    .count();
                assert_eq!(bucket_steps, 1);
            }
        }
    }

    #[test]
    fn feature_experiments_come_before_the_rollout() {
        let config = load_fixture();
        let service = DecisionService::default();

        let decision = service
            .decide_feature(
                &config,
                "new_checkout",
                "user",
                &attrs(&[("browser", "chrome".into()), ("age", 25.into())]),
                &VERBOSE,
            )
            .unwrap();
        assert_eq!(decision.source, DecisionSource::FeatureTest);
        assert_eq!(decision.variation_key(), Some("enabled"));
        assert_eq!(
            decision.experiment.map(|experiment| experiment.key),
            Some("feature_test".to_owned())
        );
    }

    #[test]
    fn features_without_a_rollout_decision() {
        let config = load_fixture();
        let service = DecisionService::default();
        let decide = |flag_key: &str| {
            service
                .decide_feature(
                    &config,
                    flag_key,
                    "user",
                    &Attributes::new(),
                    &DecideOptions::default(),
                )
                .unwrap()
        };

        let closed = decide("closed_flag");
        assert_eq!(closed.variation, None);
        assert_eq!(closed.source, DecisionSource::None);
        assert!(!closed.is_feature_enabled());
        assert!(closed.reasons.is_empty());

        assert!(decide("no_rollout_flag").reasons.is_empty());
        assert_eq!(
            decide("empty_rollout_flag").reasons.codes(),
            vec!["ROLLOUT_HAS_NO_RULES"]
        );
        assert_eq!(
            decide("dangling_rollout_flag").reasons.codes(),
            vec!["ROLLOUT_NOT_FOUND"]
        );

        let verbose = service
            .decide_feature(&config, "no_rollout_flag", "user", &Attributes::new(), &VERBOSE)
            .unwrap();
        assert_eq!(
            verbose.reasons.codes(),
            vec!["FEATURE_HAS_NO_EXPERIMENTS", "NO_ROLLOUT", "FEATURE_NOT_ENABLED"]
        );
    }

    #[test]
    fn decisions_are_deterministic() {
        let config = load_fixture();
        let service = DecisionService::default();
        let attributes = attrs(&[("country", "us".into()), ("age", 31.into())]);

        for n in 0..50 {
            let user_id = format!("user_{n}");
            let first = service
                .decide_experiment(&config, "checkout_test", &user_id, &attributes, &VERBOSE)
                .unwrap();
            let second = service
                .decide_experiment(&config, "checkout_test", &user_id, &attributes, &VERBOSE)
                .unwrap();
            assert_eq!(first, second);

            let quiet = service
                .decide_experiment(
                    &config,
                    "checkout_test",
                    &user_id,
                    &attributes,
                    &DecideOptions::default(),
                )
                .unwrap();
            assert_eq!(first.variation, quiet.variation);
            assert!(quiet.reasons.is_empty());

            let feature = service
                .decide_feature(&config, "new_checkout", &user_id, &attributes, &VERBOSE)
                .unwrap();
            assert_eq!(
                feature,
                service
                    .decide_feature(&config, "new_checkout", &user_id, &attributes, &VERBOSE)
                    .unwrap()
            );
        }
    }

    #[test]
    fn bucketing_id_attribute_replaces_user_id() {
        let config = load_fixture();
        let service = DecisionService::default();

        for n in 0..20 {
            let device = format!("device_{n}");
            let decide = |user_id: &str| {
                service
                    .decide_experiment(
                        &config,
                        "checkout_test",
                        user_id,
                        &attrs(&[
                            ("country", "us".into()),
                            ("$opt_bucketing_id", device.as_str().into()),
                        ]),
                        &DecideOptions::default(),
                    )
                    .unwrap()
                    .variation
            };
            assert_eq!(decide("alice"), decide("bob"));
        }
    }

    #[test]
    fn unknown_keys_are_errors() {
        let config = load_fixture();
        let service = DecisionService::default();

        assert!(matches!(
            service.decide_experiment(&config, "nope", "user", &Attributes::new(), &VERBOSE),
            Err(Error::ExperimentNotFound(_))
        ));
        assert!(matches!(
            service.decide_feature(&config, "nope", "user", &Attributes::new(), &VERBOSE),
            Err(Error::FeatureFlagNotFound(_))
        ));
    }
}
