use std::collections::HashMap;

use crate::{
    audience::AudienceResolver,
    datafile::{Audience, Datafile, Experiment, FeatureFlag, Group, Rollout},
    Error, Result,
};

/// Datafile schema versions this crate can evaluate.
pub const SUPPORTED_DATAFILE_VERSIONS: [&str; 3] = ["2", "3", "4"];

/// Immutable, indexed configuration snapshot.
///
/// Experiments of groups are flattened into the experiment index with their
/// [`Experiment::group_id`] filled in. Typed audiences replace legacy audiences with the same id.
#[derive(Debug, Clone)]
pub struct ProjectConfig {
    version: String,
    revision: String,
    project_id: String,
    experiments: HashMap<String, Experiment>,
    experiment_ids_by_key: HashMap<String, String>,
    groups: HashMap<String, Group>,
    rollouts: HashMap<String, Rollout>,
    feature_flags: HashMap<String, FeatureFlag>,
    audiences: HashMap<String, Audience>,
}

impl ProjectConfig {
    /// Parse and index a datafile.
    ///
    /// ```
    /// # use feature_decide::ProjectConfig;
    /// let config = ProjectConfig::from_datafile(r#"{"version": "4", "revision": "42"}"#).unwrap();
    /// assert_eq!(config.revision(), "42");
    /// ```
    pub fn from_datafile(json: &str) -> Result<ProjectConfig> {
        let datafile: Datafile = serde_json::from_str(json).inspect_err(|err| {
            log::warn!(target: "feature_decide", "failed to parse datafile: {err}");
        })?;
        ProjectConfig::try_from(datafile)
    }

    /// Datafile schema version.
    pub fn version(&self) -> &str {
        &self.version
    }

    /// Datafile revision.
    pub fn revision(&self) -> &str {
        &self.revision
    }

    /// Project id.
    pub fn project_id(&self) -> &str {
        &self.project_id
    }

    /// Experiment or group member with the given id.
    pub fn experiment_by_id(&self, id: &str) -> Option<&Experiment> {
        self.experiments.get(id)
    }

    /// Experiment or group member with the given key.
    pub fn experiment_by_key(&self, key: &str) -> Option<&Experiment> {
        self.experiment_ids_by_key
            .get(key)
            .and_then(|id| self.experiments.get(id))
    }

    /// Group with the given id.
    pub fn group(&self, id: &str) -> Option<&Group> {
        self.groups.get(id)
    }

    /// Rollout with the given id.
    pub fn rollout(&self, id: &str) -> Option<&Rollout> {
        self.rollouts.get(id)
    }

    /// Feature flag with the given key.
    pub fn feature_flag(&self, key: &str) -> Option<&FeatureFlag> {
        self.feature_flags.get(key)
    }

    /// Audience with the given id. Typed audiences win over legacy ones.
    pub fn audience(&self, id: &str) -> Option<&Audience> {
        self.audiences.get(id)
    }

    /// Resolver over this snapshot's audience table.
    pub fn audience_resolver(&self) -> AudienceResolver<'_> {
        AudienceResolver::new(&self.audiences)
    }
}

impl TryFrom<Datafile> for ProjectConfig {
    type Error = Error;

    fn try_from(datafile: Datafile) -> Result<Self> {
        if !SUPPORTED_DATAFILE_VERSIONS.contains(&datafile.version.as_str()) {
            log::warn!(target: "feature_decide",
                       version:display = datafile.version;
                       "unsupported datafile version");
            return Err(Error::UnsupportedDatafileVersion(datafile.version));
        }

        let mut experiments = HashMap::new();
        let mut groups = HashMap::new();

        for experiment in datafile.experiments {
            experiments.insert(experiment.id.clone(), experiment);
        }
        for mut group in datafile.groups {
            for experiment in std::mem::take(&mut group.experiments) {
                experiments.insert(
                    experiment.id.clone(),
                    Experiment {
                        group_id: Some(group.id.clone()),
                        ..experiment
                    },
                );
            }
            groups.insert(group.id.clone(), group);
        }

        let experiment_ids_by_key = experiments
            .values()
            .map(|experiment| (experiment.key.clone(), experiment.id.clone()))
            .collect();

        let audiences = datafile
            .audiences
            .into_iter()
            .chain(datafile.typed_audiences)
            .map(|audience| (audience.id.clone(), audience))
            .collect();

        Ok(ProjectConfig {
            version: datafile.version,
            revision: datafile.revision,
            project_id: datafile.project_id,
            experiments,
            experiment_ids_by_key,
            groups,
            rollouts: datafile
                .rollouts
                .into_iter()
                .map(|rollout| (rollout.id.clone(), rollout))
                .collect(),
            feature_flags: datafile
                .feature_flags
                .into_iter()
                .map(|flag| (flag.key.clone(), flag))
                .collect(),
            audiences,
        })
    }
}
