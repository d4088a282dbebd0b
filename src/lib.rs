//! Decision core for feature flags and A/B experiments.
//!
//! # Overview
//!
//! The crate evaluates a *datafile* (a JSON snapshot of experiments, feature flags, rollouts
//! and audiences) for a user, identified by a user id and a map of [`Attributes`]. Decisions
//! are fully local and deterministic: the same snapshot, user and attributes always produce the
//! same variation.
//!
//! The host publishes snapshots to an [`Evaluator`] and asks it for decisions:
//!
//! ```
//! # use std::collections::HashMap;
//! # use feature_decide::EvaluatorConfig;
//! let evaluator = EvaluatorConfig::new().to_evaluator();
//! evaluator
//!     .publish_datafile(r#"{"version": "4", "revision": "1"}"#)
//!     .unwrap();
//!
//! // Unknown flags are reported as errors.
//! assert!(evaluator.decide_feature("flag", "user", &HashMap::new()).is_err());
//! ```
//!
//! Lower-level building blocks are available too: [`DecisionService`] decides against a
//! borrowed [`ProjectConfig`], [`AudienceResolver`] evaluates audience expressions to a
//! [`TriState`], and [`Bucketer`] maps users onto traffic allocations with MurmurHash3.
//!
//! # Error Handling
//!
//! Host-level failures (missing configuration, invalid datafile, unknown keys) are represented
//! by the [`Error`] enum. Problems inside a decision never fail it: they are recorded as
//! [`Reason`]s on the returned decision.
//!
//! # Logging
//!
//! The package uses the [`log`](https://docs.rs/log/latest/log/) crate with target
//! `feature_decide`. Consider integrating a `log`-compatible logger implementation for better
//! visibility into decisions.

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

mod attributes;
mod audience;
mod bucketer;
pub mod conditions;
mod config;
mod configuration_store;
pub mod datafile;
mod decision;
mod error;
mod evaluator;
mod forced_variations;
mod project_config;
mod reasons;
mod semantic_version;
mod sharder;
mod user_profile;

pub use attributes::{AttributeValue, Attributes};
pub use audience::AudienceResolver;
pub use bucketer::{bucketing_id, bucketing_key, find_range, Bucketer, BUCKETING_ID_ATTRIBUTE};
pub use conditions::TriState;
pub use config::EvaluatorConfig;
pub use configuration_store::{Configuration, ConfigurationStore};
pub use datafile::{ConditionNode, UserAttribute};
pub use decision::{
    DecideOptions, DecisionService, DecisionSource, ExperimentDecision, FeatureDecision,
    FeatureVariation,
};
pub use error::{ConditionError, Error, Result};
pub use evaluator::Evaluator;
pub use forced_variations::ForcedVariations;
pub use project_config::{ProjectConfig, SUPPORTED_DATAFILE_VERSIONS};
pub use reasons::{DecisionReasons, EvaluationKind, Reason};
pub use sharder::{bucket_value, Murmur3Sharder, Sharder, MAX_TRAFFIC_VALUE};
pub use user_profile::{InMemoryUserProfileService, UserProfileService};
