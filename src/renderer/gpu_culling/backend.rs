//! Execution backends for the culling stages
//!
//! The culler owns lifecycle and validation; a backend owns the storage and
//! knows how to run reset -> cull -> rewrite args -> copy on it.

use super::{CullUniforms, DrawCommand, PrototypeLayout};
use crate::config::CullerConfig;
use crate::error::CullResult;
use crate::instance::InstanceRecord;
use std::ops::Range;

/// Workgroup counts of the three stages for one layout
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StageDispatch {
    pub reset_workgroups: u32,
    pub cull_workgroups: u32,
    pub args_workgroups: u32,
}

pub trait CullBackend {
    /// Instance source supplied by the instance generator. Not owned by the culler.
    type Source;
    /// Caller-owned draw argument destination
    type Target: ?Sized;
    /// Buffers and stages created by `create_resources`
    type Resources;

    fn name(&self) -> &'static str;

    /// Allocate the buffer set for a layout and bind it to the stages
    fn create_resources(
        &self,
        config: &CullerConfig,
        layout: &PrototypeLayout,
        source: Self::Source,
    ) -> CullResult<Self::Resources>;

    /// Reject targets that cannot receive `required_bytes` of draw arguments
    fn validate_target(&self, target: &Self::Target, required_bytes: u64) -> CullResult<()>;

    /// Run all three stages and copy the staged arguments into `target`
    fn run_stages(
        &self,
        resources: &Self::Resources,
        uniforms: &CullUniforms,
        target: &Self::Target,
    ) -> CullResult<()>;

    /// Raw per-prototype counters from the last cull
    fn read_visible_counts(&self, resources: &Self::Resources) -> CullResult<Vec<u32>>;

    /// Records in a slot range of the visible output buffer
    fn read_visible_range(
        &self,
        resources: &Self::Resources,
        slots: Range<u32>,
    ) -> CullResult<Vec<InstanceRecord>>;

    /// Rewritten commands in the staging buffer
    fn read_staged_commands(&self, resources: &Self::Resources) -> CullResult<Vec<DrawCommand>>;

    /// Free owned storage. The instance source is left alone.
    fn release(&self, resources: Self::Resources);
}
