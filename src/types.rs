/// Class identifier attached to every instance flowing through a chain.
/// Examples: `Standard`, `Target`
pub type ClassLabel = String;
/// Identifier for a stage within a chain; also names its persistence directory.
/// Examples: `source`, `instance_selection`, `centering`
pub type StageId = String;
/// Seed scoped to one execution of a chain, shared by every stage in that run.
/// Example: the run number `3`
pub type RunSeed = u64;
