use std::sync::Arc;

use crate::{
    user_profile::NoopUserProfileService, DecideOptions, Evaluator, UserProfileService,
};

/// Configuration for [`Evaluator`].
pub struct EvaluatorConfig {
    pub(crate) user_profile_service: Arc<dyn UserProfileService + Send + Sync>,
    pub(crate) default_options: DecideOptions,
}

impl Default for EvaluatorConfig {
    fn default() -> Self {
        EvaluatorConfig {
            user_profile_service: Arc::new(NoopUserProfileService),
            default_options: DecideOptions::default(),
        }
    }
}

impl EvaluatorConfig {
    /// Create a default configuration: no user profiles, no verbose reasons.
    ///
    /// ```
    /// # use feature_decide::EvaluatorConfig;
    /// EvaluatorConfig::new();
    /// ```
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the service that persists experiment assignments.
    ///
    /// ```
    /// # use feature_decide::{EvaluatorConfig, InMemoryUserProfileService};
    /// let mut config = EvaluatorConfig::new();
    /// config.user_profile_service(InMemoryUserProfileService::new());
    /// ```
    pub fn user_profile_service(
        &mut self,
        user_profile_service: impl UserProfileService + Send + Sync + 'static,
    ) -> &mut Self {
        self.user_profile_service = Arc::new(user_profile_service);
        self
    }

    /// Share a user profile service with the host.
    pub fn shared_user_profile_service(
        &mut self,
        user_profile_service: Arc<dyn UserProfileService + Send + Sync>,
    ) -> &mut Self {
        self.user_profile_service = user_profile_service;
        self
    }

    /// Options used by [`Evaluator::decide_experiment`] and [`Evaluator::decide_feature`].
    pub fn default_options(&mut self, options: DecideOptions) -> &mut Self {
        self.default_options = options;
        self
    }

    /// Create a new [`Evaluator`] using the specified configuration.
    ///
    /// ```
    /// # use feature_decide::{EvaluatorConfig, Evaluator};
    /// let evaluator: Evaluator = EvaluatorConfig::new().to_evaluator();
    /// ```
    pub fn to_evaluator(self) -> Evaluator {
        Evaluator::new(self)
    }
}
