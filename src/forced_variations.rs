use std::{
    collections::HashMap,
    sync::{PoisonError, RwLock},
};

use crate::{
    datafile::{Experiment, Variation},
    reasons::{DecisionReasons, Reason},
    Error, ProjectConfig, Result,
};

/// Host-owned override table: a forced variation wins over every other decision step.
///
/// Entries are stored by experiment id and variation id, so they survive snapshot replacement
/// as long as the ids do.
#[derive(Debug, Default)]
pub struct ForcedVariations {
    // user id -> experiment id -> variation id
    table: RwLock<HashMap<String, HashMap<String, String>>>,
}

impl ForcedVariations {
    /// Empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Force `user_id` into `variation_key` of `experiment_key`, or clear the override when
    /// `variation_key` is `None`.
    pub fn set_forced_variation(
        &self,
        config: &ProjectConfig,
        experiment_key: &str,
        user_id: &str,
        variation_key: Option<&str>,
    ) -> Result<()> {
        let experiment = config
            .experiment_by_key(experiment_key)
            .ok_or_else(|| Error::ExperimentNotFound(experiment_key.to_owned()))?;

        let mut table = self.table.write().unwrap_or_else(PoisonError::into_inner);

        let Some(variation_key) = variation_key else {
            if let Some(experiments) = table.get_mut(user_id) {
                experiments.remove(&experiment.id);
            }
            log::debug!(target: "feature_decide",
                        user_id,
                        experiment_key;
                        "removed forced variation");
            return Ok(());
        };

        let variation = experiment
            .get_variation_by_key(variation_key)
            .ok_or_else(|| Error::VariationNotFound {
                experiment_key: experiment_key.to_owned(),
                variation_key: variation_key.to_owned(),
            })?;

        table
            .entry(user_id.to_owned())
            .or_default()
            .insert(experiment.id.clone(), variation.id.clone());
        log::debug!(target: "feature_decide",
                    user_id,
                    experiment_key,
                    variation_key;
                    "set forced variation");
        Ok(())
    }

    /// Forced variation of `user_id` in `experiment_key`, if any.
    pub fn get_forced_variation<'c>(
        &self,
        config: &'c ProjectConfig,
        experiment_key: &str,
        user_id: &str,
    ) -> Option<&'c Variation> {
        let experiment = config.experiment_by_key(experiment_key)?;
        self.find(experiment, user_id, &mut DecisionReasons::default())
    }

    pub(crate) fn find<'c>(
        &self,
        experiment: &'c Experiment,
        user_id: &str,
        reasons: &mut DecisionReasons,
    ) -> Option<&'c Variation> {
        let variation_id = {
            let table = self.table.read().ok()?;
            table.get(user_id)?.get(&experiment.id)?.clone()
        };

        match experiment.get_variation_by_id(&variation_id) {
            Some(variation) => {
                reasons.add(Reason::ForcedVariationMapped {
                    user_id: user_id.to_owned(),
                    experiment_key: experiment.key.clone(),
                    variation_key: variation.key.clone(),
                });
                Some(variation)
            }
            None => {
                reasons.add(Reason::ForcedVariationMappedButInvalid {
                    user_id: user_id.to_owned(),
                    experiment_key: experiment.key.clone(),
                });
                None
            }
        }
    }
}
