use crate::{
    datafile::{Experiment, GroupPolicy, TrafficAllocation, Variation},
    reasons::{DecisionReasons, Reason},
    sharder::{Murmur3Sharder, Sharder},
    AttributeValue, Attributes, ProjectConfig,
};

/// Reserved attribute that replaces the user id as the bucketing id.
pub const BUCKETING_ID_ATTRIBUTE: &str = "$opt_bucketing_id";

/// String hashed to place `bucketing_id` within the ranges of `entity_id`.
pub fn bucketing_key(bucketing_id: &str, entity_id: &str) -> String {
    format!("{bucketing_id}{entity_id}")
}

/// Id used for bucketing: the `$opt_bucketing_id` attribute if it is a string, else the user id.
pub fn bucketing_id<'a>(user_id: &'a str, attributes: &'a Attributes) -> &'a str {
    match attributes.get(BUCKETING_ID_ATTRIBUTE) {
        Some(AttributeValue::String(id)) => id,
        Some(other) => {
            log::warn!(target: "feature_decide",
                       user_id,
                       bucketing_id:display = other;
                       "bucketing id attribute is not a string, bucketing by user id");
            user_id
        }
        None => user_id,
    }
}

/// Entity of the first range containing `value`.
///
/// Ranges are cumulative: each entry covers `[previous.end_of_range, end_of_range)`. Values at or
/// beyond the last `end_of_range` are unallocated.
pub fn find_range(traffic_allocation: &[TrafficAllocation], value: u32) -> Option<&str> {
    traffic_allocation
        .iter()
        .find(|range| value < range.end_of_range)
        .map(|range| range.entity_id.as_str())
}

/// Places users into group members and experiment variations.
#[derive(Debug, Clone, Default)]
pub struct Bucketer<S = Murmur3Sharder> {
    sharder: S,
}

impl<S: Sharder> Bucketer<S> {
    /// Bucketer hashing with `sharder`.
    pub fn new(sharder: S) -> Self {
        Bucketer { sharder }
    }

    /// Bucket `bucketing_id` into a variation of `experiment`.
    ///
    /// Members of a `random` group must first win the group-level bucketing step.
    pub fn bucket_experiment<'c>(
        &self,
        config: &ProjectConfig,
        experiment: &'c Experiment,
        bucketing_id: &str,
        reasons: &mut DecisionReasons,
    ) -> Option<&'c Variation> {
        let group = experiment
            .group_id
            .as_deref()
            .and_then(|group_id| config.group(group_id));

        if let Some(group) = group.filter(|group| group.policy == GroupPolicy::Random) {
            if group.traffic_allocation.is_empty() {
                reasons.add(Reason::GroupHasNoTrafficAllocation {
                    group_id: group.id.clone(),
                });
                return None;
            }

            match self.allocate(&group.traffic_allocation, bucketing_id, &group.id, reasons) {
                Some(experiment_id) if config.experiment_by_id(experiment_id).is_none() => {
                    reasons.add(Reason::BucketedIntoInvalidExperiment {
                        experiment_id: experiment_id.to_owned(),
                    });
                    return None;
                }
                Some(experiment_id) if experiment_id == experiment.id => {
                    reasons.add(Reason::BucketedIntoExperimentInGroup {
                        bucketing_id: bucketing_id.to_owned(),
                        experiment_key: experiment.key.clone(),
                        group_id: group.id.clone(),
                    });
                }
                Some(_) => {
                    reasons.add(Reason::NotBucketedIntoExperimentInGroup {
                        bucketing_id: bucketing_id.to_owned(),
                        experiment_key: experiment.key.clone(),
                        group_id: group.id.clone(),
                    });
                    return None;
                }
                None => {
                    reasons.add(Reason::NotBucketedIntoAnyExperimentInGroup {
                        bucketing_id: bucketing_id.to_owned(),
                        group_id: group.id.clone(),
                    });
                    return None;
                }
            }
        }

        self.bucket_to_variation(experiment, bucketing_id, reasons)
    }

    /// Bucket into a variation of `experiment`, ignoring groups. Rollout rules use this directly.
    pub fn bucket_to_variation<'c>(
        &self,
        experiment: &'c Experiment,
        bucketing_id: &str,
        reasons: &mut DecisionReasons,
    ) -> Option<&'c Variation> {
        if experiment.traffic_allocation.is_empty() {
            reasons.add(Reason::ExperimentHasNoTrafficAllocation {
                experiment_key: experiment.key.clone(),
            });
            return None;
        }

        // An empty entity id is an unallocated slice.
        let variation_id = self
            .allocate(
                &experiment.traffic_allocation,
                bucketing_id,
                &experiment.id,
                reasons,
            )
            .filter(|id| !id.is_empty())?;

        let variation = experiment.get_variation_by_id(variation_id);
        if variation.is_none() {
            reasons.add(Reason::BucketedIntoInvalidVariation {
                variation_id: variation_id.to_owned(),
            });
        }
        variation
    }

    fn allocate<'t>(
        &self,
        traffic_allocation: &'t [TrafficAllocation],
        bucketing_id: &str,
        entity_id: &str,
        reasons: &mut DecisionReasons,
    ) -> Option<&'t str> {
        let bucket_value = self
            .sharder
            .bucket_value(bucketing_key(bucketing_id, entity_id));
        log::trace!(target: "feature_decide",
                    bucketing_id,
                    entity_id,
                    bucket_value;
                    "computed bucket value");
        reasons.add(Reason::BucketValueAssigned {
            bucket_value,
            bucketing_id: bucketing_id.to_owned(),
        });

        find_range(traffic_allocation, bucket_value)
    }
}
