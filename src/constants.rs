/// Constants used by sampling configuration and resampling stages.
pub mod selection {
    /// Percentage that retains every instance; also the clamp ceiling.
    pub const FULL_PERCENTAGE: f64 = 100.0;
    /// Default percentage of training instances forwarded downstream.
    pub const DEFAULT_TRAIN_PERCENTAGE: f64 = FULL_PERCENTAGE;
    /// Default percentage of test instances forwarded downstream.
    pub const DEFAULT_TEST_PERCENTAGE: f64 = FULL_PERCENTAGE;
}

/// Constants used by stage construction and chain assembly.
pub mod stage {
    /// Caching is on unless a stage opts out.
    pub const DEFAULT_CACHING: bool = true;
    /// Run number used when none is configured.
    pub const DEFAULT_RUN_NUMBER: u64 = 0;
    /// Stage id given to the chain's data source when built from raw vectors.
    pub const DEFAULT_SOURCE_ID: &str = "source";
}

/// Constants used when storing learned transform state.
pub mod persistence {
    /// File written by `MeanCentering` inside its stage directory.
    pub const CENTERING_STATE_FILENAME: &str = "centering.json";
    /// Version tag for stored centering state.
    pub const CENTERING_STATE_VERSION: u8 = 1;
}
