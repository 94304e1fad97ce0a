use geocluster_shared::status::Status;

#[derive(Debug, Clone)]
pub struct StageMetrics {
    pub index: usize,
    pub name: String,
    pub status: Status,
    pub duration_ms: u128,
}

#[derive(Debug, Clone)]
pub struct PipelineMetrics {
    pub status: Status,
    pub total_duration_ms: u128,
    pub stages: Vec<StageMetrics>,
}

impl PipelineMetrics {
    pub fn stage_duration_ms(&self, name: &str) -> Option<u128> {
        self.stages
            .iter()
            .find(|stage| stage.name == name)
            .map(|stage| stage.duration_ms)
    }

    /// Names of the stages that ran, in order.
    pub fn executed(&self) -> Vec<&str> {
        self.stages.iter().map(|stage| stage.name.as_str()).collect()
    }
}
