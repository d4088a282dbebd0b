use derive_more::Display;

use crate::{error::ConditionError, TriState};

/// What an audience expression is gating.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum EvaluationKind {
    /// Audience gate of an experiment.
    #[display("experiment")]
    Experiment,
    /// Audience gate of a rollout rule.
    #[display("rule")]
    RolloutRule,
}

/// One step of a decision.
///
/// [`Reason::code`] is stable and machine-readable; `Display` gives a human-readable message.
#[derive(Debug, Clone, PartialEq, Display)]
#[non_exhaustive]
pub enum Reason {
    /// The host override table forced a variation.
    #[display("Variation ({variation_key}) is mapped to experiment ({experiment_key}) and user ({user_id}) in the forced variation map.")]
    ForcedVariationMapped {
        /// User id.
        user_id: String,
        /// Experiment key.
        experiment_key: String,
        /// Forced variation key.
        variation_key: String,
    },
    /// The host override table points at a variation that no longer exists.
    #[display("Invalid variation is mapped to experiment ({experiment_key}) and user ({user_id}) in the forced variation map.")]
    ForcedVariationMappedButInvalid {
        /// User id.
        user_id: String,
        /// Experiment key.
        experiment_key: String,
    },
    /// The experiment whitelist forced a variation.
    #[display("Forced variation ({variation_key}) is found for user ({user_id}).")]
    WhitelistedVariationFound {
        /// Whitelisted variation key.
        variation_key: String,
        /// User id.
        user_id: String,
    },
    /// The experiment whitelist names an unknown variation key.
    #[display("Forced variation ({variation_key}) is found for user ({user_id}), but it's not in datafile.")]
    WhitelistedVariationInvalid {
        /// Whitelisted variation key.
        variation_key: String,
        /// User id.
        user_id: String,
    },
    /// A sticky variation was returned from the user profile.
    #[display("Returning previously activated variation ({variation_key}) of experiment ({experiment_key}) for user ({user_id}) from user profile.")]
    VariationFromUserProfile {
        /// Stored variation key.
        variation_key: String,
        /// Experiment key.
        experiment_key: String,
        /// User id.
        user_id: String,
    },
    /// The stored variation is gone from the experiment; the user is bucketed again.
    #[display("Variation ({variation_id}) stored for experiment ({experiment_key}) has been removed for user ({user_id}).")]
    StoredVariationRemoved {
        /// Stored variation id.
        variation_id: String,
        /// Experiment key.
        experiment_key: String,
        /// User id.
        user_id: String,
    },
    /// Only running experiments bucket users.
    #[display("Experiment ({experiment_key}) is not running.")]
    ExperimentNotRunning {
        /// Experiment key.
        experiment_key: String,
    },
    /// A condition evaluated to `Unknown`.
    #[display("{_0}")]
    ConditionUnevaluable(ConditionError),
    /// Combined result of an audience gate.
    #[display("Audiences for {kind} ({logging_key}) collectively evaluated to ({result}).")]
    AudienceEvaluationResult {
        /// What the gate belongs to.
        kind: EvaluationKind,
        /// Experiment key or rule number.
        logging_key: String,
        /// Gate result; only `True` admits.
        result: TriState,
    },
    /// The audience gate rejected the user.
    #[display("User ({user_id}) does not meet conditions to be in experiment ({experiment_key}).")]
    UserNotInExperiment {
        /// User id.
        user_id: String,
        /// Experiment key.
        experiment_key: String,
    },
    /// A bucket value was computed.
    #[display("Assigned bucket ({bucket_value}) to user with bucketing ID ({bucketing_id}).")]
    BucketValueAssigned {
        /// Value in `[0, 10000)`.
        bucket_value: u32,
        /// Bucketing id the value was computed from.
        bucketing_id: String,
    },
    /// A random group has an empty traffic allocation.
    #[display("Group ({group_id}) has no traffic allocation.")]
    GroupHasNoTrafficAllocation {
        /// Group id.
        group_id: String,
    },
    /// An experiment has an empty traffic allocation.
    #[display("Experiment ({experiment_key}) has no traffic allocation.")]
    ExperimentHasNoTrafficAllocation {
        /// Experiment key.
        experiment_key: String,
    },
    /// The group-level bucketing picked this experiment.
    #[display("User ({bucketing_id}) is in experiment ({experiment_key}) of group ({group_id}).")]
    BucketedIntoExperimentInGroup {
        /// Bucketing id.
        bucketing_id: String,
        /// Experiment key.
        experiment_key: String,
        /// Group id.
        group_id: String,
    },
    /// The group-level bucketing picked another member.
    #[display("User ({bucketing_id}) is not in experiment ({experiment_key}) of group ({group_id}).")]
    NotBucketedIntoExperimentInGroup {
        /// Bucketing id.
        bucketing_id: String,
        /// Experiment key.
        experiment_key: String,
        /// Group id.
        group_id: String,
    },
    /// The bucket value fell outside every group range.
    #[display("User ({bucketing_id}) is not in any experiment of group ({group_id}).")]
    NotBucketedIntoAnyExperimentInGroup {
        /// Bucketing id.
        bucketing_id: String,
        /// Group id.
        group_id: String,
    },
    /// A group range points at an unknown experiment id.
    #[display("Bucketed into an invalid experiment id ({experiment_id}).")]
    BucketedIntoInvalidExperiment {
        /// Unknown experiment id.
        experiment_id: String,
    },
    /// A traffic range points at an unknown variation id.
    #[display("Bucketed into an invalid variation id ({variation_id}).")]
    BucketedIntoInvalidVariation {
        /// Unknown variation id.
        variation_id: String,
    },
    /// Bucketing produced a variation.
    #[display("User ({user_id}) is in variation ({variation_key}) of experiment ({experiment_key}).")]
    BucketedIntoVariation {
        /// User id.
        user_id: String,
        /// Experiment key.
        experiment_key: String,
        /// Variation key.
        variation_key: String,
    },
    /// Bucketing produced no variation.
    #[display("User ({user_id}) is in no variation.")]
    NotBucketedIntoVariation {
        /// User id.
        user_id: String,
    },
    /// The feature flag lists no experiments.
    #[display("Feature ({flag_key}) is not attached to any experiments.")]
    FeatureHasNoExperiments {
        /// Feature flag key.
        flag_key: String,
    },
    /// The feature flag has an empty rollout id.
    #[display("There is no rollout of feature ({flag_key}).")]
    NoRolloutExists {
        /// Feature flag key.
        flag_key: String,
    },
    /// The feature flag references an unknown rollout.
    #[display("Invalid rollout id ({rollout_id}) attached to feature ({flag_key}).")]
    RolloutNotFound {
        /// Unknown rollout id.
        rollout_id: String,
        /// Feature flag key.
        flag_key: String,
    },
    /// The rollout has no rules.
    #[display("Rollout ({rollout_id}) has no rules.")]
    RolloutHasNoRules {
        /// Rollout id.
        rollout_id: String,
    },
    /// The audience gate of a rollout rule admitted the user.
    #[display("User ({user_id}) meets conditions for targeting rule ({rule}).")]
    MeetsConditionsForTargetingRule {
        /// User id.
        user_id: String,
        /// Rule number, or `Everyone Else`.
        rule: String,
    },
    /// The audience gate of a rollout rule rejected the user.
    #[display("User ({user_id}) does not meet conditions for targeting rule ({rule}).")]
    DoesNotMeetConditionsForTargetingRule {
        /// User id.
        user_id: String,
        /// Rule number, or `Everyone Else`.
        rule: String,
    },
    /// The traffic of a rollout rule admitted the user.
    #[display("User ({user_id}) is in the traffic group of targeting rule ({rule}).")]
    BucketedIntoTargetingRule {
        /// User id.
        user_id: String,
        /// Rule number.
        rule: String,
    },
    /// The traffic of a rollout rule missed the user; the cascade continues.
    #[display("User ({user_id}) is not in the traffic group for targeting rule ({rule}).")]
    NotBucketedIntoTargetingRule {
        /// User id.
        user_id: String,
        /// Rule number, or `Everyone Else`.
        rule: String,
    },
    /// The last rollout rule admitted the user.
    #[display("User ({user_id}) is in the traffic group of the (Everyone Else) rule.")]
    BucketedIntoEveryoneElseRule {
        /// User id.
        user_id: String,
    },
    /// Final outcome of an enabled feature decision.
    #[display("Feature ({flag_key}) is enabled for user ({user_id}).")]
    FeatureEnabledForUser {
        /// Feature flag key.
        flag_key: String,
        /// User id.
        user_id: String,
    },
    /// Final outcome of a disabled feature decision.
    #[display("Feature ({flag_key}) is not enabled for user ({user_id}).")]
    FeatureNotEnabledForUser {
        /// Feature flag key.
        flag_key: String,
        /// User id.
        user_id: String,
    },
}

impl Reason {
    /// Stable identifier of the reason kind.
    pub fn code(&self) -> &'static str {
        match self {
            Reason::ForcedVariationMapped { .. } => "FORCED_VARIATION_MAPPED",
            Reason::ForcedVariationMappedButInvalid { .. } => "FORCED_VARIATION_INVALID",
            Reason::WhitelistedVariationFound { .. } => "WHITELISTED_VARIATION_FOUND",
            Reason::WhitelistedVariationInvalid { .. } => "WHITELISTED_VARIATION_INVALID",
            Reason::VariationFromUserProfile { .. } => "VARIATION_FROM_USER_PROFILE",
            Reason::StoredVariationRemoved { .. } => "STORED_VARIATION_REMOVED",
            Reason::ExperimentNotRunning { .. } => "EXPERIMENT_NOT_RUNNING",
            Reason::ConditionUnevaluable(_) => "CONDITION_UNEVALUABLE",
            Reason::AudienceEvaluationResult { .. } => "AUDIENCE_EVALUATION_RESULT",
            Reason::UserNotInExperiment { .. } => "AUDIENCE_MISMATCH",
            Reason::BucketValueAssigned { .. } => "BUCKET_VALUE_ASSIGNED",
            Reason::GroupHasNoTrafficAllocation { .. } => "GROUP_HAS_NO_TRAFFIC_ALLOCATION",
            Reason::ExperimentHasNoTrafficAllocation { .. } => {
                "EXPERIMENT_HAS_NO_TRAFFIC_ALLOCATION"
            }
            Reason::BucketedIntoExperimentInGroup { .. } => "BUCKETED_INTO_GROUP_EXPERIMENT",
            Reason::NotBucketedIntoExperimentInGroup { .. } => {
                "NOT_BUCKETED_INTO_GROUP_EXPERIMENT"
            }
            Reason::NotBucketedIntoAnyExperimentInGroup { .. } => "NOT_BUCKETED_INTO_GROUP",
            Reason::BucketedIntoInvalidExperiment { .. } => "BUCKETED_INTO_INVALID_EXPERIMENT",
            Reason::BucketedIntoInvalidVariation { .. } => "BUCKETED_INTO_INVALID_VARIATION",
            Reason::BucketedIntoVariation { .. } => "BUCKETED_INTO_ENTITY",
            Reason::NotBucketedIntoVariation { .. } => "NOT_BUCKETED",
            Reason::FeatureHasNoExperiments { .. } => "FEATURE_HAS_NO_EXPERIMENTS",
            Reason::NoRolloutExists { .. } => "NO_ROLLOUT",
            Reason::RolloutNotFound { .. } => "ROLLOUT_NOT_FOUND",
            Reason::RolloutHasNoRules { .. } => "ROLLOUT_HAS_NO_RULES",
            Reason::MeetsConditionsForTargetingRule { .. } => "RULE_AUDIENCE_MATCH",
            Reason::DoesNotMeetConditionsForTargetingRule { .. } => "RULE_AUDIENCE_MISMATCH",
            Reason::BucketedIntoTargetingRule { .. } => "BUCKETED_INTO_RULE",
            Reason::NotBucketedIntoTargetingRule { .. } => "NOT_BUCKETED_INTO_RULE",
            Reason::BucketedIntoEveryoneElseRule { .. } => "BUCKETED_INTO_EVERYONE_ELSE_RULE",
            Reason::FeatureEnabledForUser { .. } => "FEATURE_ENABLED",
            Reason::FeatureNotEnabledForUser { .. } => "FEATURE_NOT_ENABLED",
        }
    }

    /// Configuration problems. These are recorded even when verbose reasons are off.
    pub fn is_error(&self) -> bool {
        matches!(
            self,
            Reason::ForcedVariationMappedButInvalid { .. }
                | Reason::WhitelistedVariationInvalid { .. }
                | Reason::BucketedIntoInvalidExperiment { .. }
                | Reason::BucketedIntoInvalidVariation { .. }
                | Reason::RolloutNotFound { .. }
                | Reason::RolloutHasNoRules { .. }
        )
    }
}

/// Order-preserving reason trail of a single decision.
///
/// Every reason is logged. Only errors are kept unless verbose reasons were requested, so the
/// trail never influences the decision itself.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DecisionReasons {
    include_infos: bool,
    reasons: Vec<Reason>,
}

impl DecisionReasons {
    /// Empty trail. With `include_infos` off only errors are kept.
    pub fn new(include_infos: bool) -> Self {
        DecisionReasons {
            include_infos,
            reasons: Vec::new(),
        }
    }

    /// Log `reason` and keep it if the trail records its kind.
    pub fn add(&mut self, reason: Reason) {
        if reason.is_error() {
            log::warn!(target: "feature_decide", code = reason.code(); "{reason}");
        } else {
            log::debug!(target: "feature_decide", code = reason.code(); "{reason}");
        }

        if self.include_infos || reason.is_error() {
            self.reasons.push(reason);
        }
    }

    /// Recorded reasons, in order.
    pub fn reasons(&self) -> &[Reason] {
        &self.reasons
    }

    /// Returns `true` if nothing was recorded.
    pub fn is_empty(&self) -> bool {
        self.reasons.is_empty()
    }

    /// Human-readable messages, in order.
    pub fn messages(&self) -> Vec<String> {
        self.reasons.iter().map(ToString::to_string).collect()
    }

    /// [`Reason::code`] of every recorded reason, in order.
    pub fn codes(&self) -> Vec<&'static str> {
        self.reasons.iter().map(Reason::code).collect()
    }
}
