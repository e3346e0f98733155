//! Frustum Culler - lifecycle and per-frame orchestration
//!
//! Uninitialized -> Initialized -> Disposed. Only an initialized culler
//! dispatches work; everything else about a cull call is a logged no-op.

use super::backend::{CullBackend, StageDispatch};
use super::{
    max_axis_scale, CullUniforms, CullingStats, DrawCommand, Frustum, MeshSegment,
    PrototypeLayout, DRAW_COMMAND_SIZE,
};
use crate::config::CullerConfig;
use crate::error::{invalid_config, CullError, CullResult};
use crate::instance::InstanceRecord;
use cgmath::{Matrix4, SquareMatrix};

/// Externally visible lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CullerState {
    Uninitialized,
    Initialized,
    Disposed,
}

impl CullerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CullerState::Uninitialized => "uninitialized",
            CullerState::Initialized => "initialized",
            CullerState::Disposed => "disposed",
        }
    }
}

/// Why a cull call did nothing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    NotInitialized,
    Disposed,
    MissingFrustum,
    MissingTarget,
}

/// Result of a cull call that did not fail
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CullOutcome {
    Dispatched {
        instance_lanes: u32,
        draw_commands: u32,
    },
    Skipped(SkipReason),
}

impl CullOutcome {
    pub fn is_dispatched(&self) -> bool {
        matches!(self, CullOutcome::Dispatched { .. })
    }
}

struct ActiveCuller<R> {
    layout: PrototypeLayout,
    dispatch: StageDispatch,
    resources: R,
}

enum Lifecycle<R> {
    Uninitialized,
    Initialized(ActiveCuller<R>),
    Disposed,
}

/// Culls an instance population against a frustum and rewrites indirect draw
/// arguments so each segment draws only its prototype's visible instances
pub struct FrustumCuller<B: CullBackend> {
    backend: B,
    config: CullerConfig,
    global_transform: Matrix4<f32>,
    lifecycle: Lifecycle<B::Resources>,
}

impl<B: CullBackend> FrustumCuller<B> {
    pub fn new(backend: B, config: CullerConfig) -> Self {
        Self {
            backend,
            config,
            global_transform: Matrix4::identity(),
            lifecycle: Lifecycle::Uninitialized,
        }
    }

    /// Validate the static tables, allocate the buffer set and bind the stages.
    /// On failure the culler stays uninitialized and holds no buffers.
    pub fn initialize(
        &mut self,
        source: B::Source,
        instance_counts: &[u32],
        segments: &[MeshSegment],
        template_commands: &[DrawCommand],
    ) -> CullResult<()> {
        if !matches!(self.lifecycle, Lifecycle::Uninitialized) {
            log::error!(
                "[Frustum Culler] Initialize called while {}",
                self.state().as_str()
            );
            return Err(CullError::AlreadyInitialized);
        }

        let layout =
            PrototypeLayout::build(&self.config, instance_counts, segments, template_commands)
                .map_err(|e| {
                    log::error!("[Frustum Culler] Rejected configuration: {}", e);
                    e
                })?;

        let resources = self
            .backend
            .create_resources(&self.config, &layout, source)
            .map_err(|e| {
                log::error!(
                    "[Frustum Culler] Failed to create {} resources: {}",
                    self.backend.name(),
                    e
                );
                e
            })?;

        let dispatch = layout.stage_dispatch();
        log::info!(
            "[Frustum Culler] Initialized '{}' on {}: {} instances, {} prototypes, \
             {} draw commands (workgroups reset={} cull={} args={})",
            self.config.label,
            self.backend.name(),
            layout.total_instance_count(),
            layout.prototype_count(),
            layout.command_count(),
            dispatch.reset_workgroups,
            dispatch.cull_workgroups,
            dispatch.args_workgroups
        );

        self.lifecycle = Lifecycle::Initialized(ActiveCuller {
            layout,
            dispatch,
            resources,
        });
        Ok(())
    }

    /// Transform applied to raw instance positions from the next cull on
    pub fn set_global_transform(&mut self, transform: Matrix4<f32>) {
        self.global_transform = transform;
    }

    pub fn global_transform(&self) -> Matrix4<f32> {
        self.global_transform
    }

    /// Run reset -> cull -> rewrite args and copy the result into `target`.
    ///
    /// Every cull rewrites the same uniform, counter and staging buffers, so
    /// one culler serves one submitter at a time.
    pub fn cull(
        &mut self,
        frustum: Option<&Frustum>,
        target: Option<&B::Target>,
    ) -> CullResult<CullOutcome> {
        let active = match &self.lifecycle {
            Lifecycle::Initialized(active) => active,
            Lifecycle::Uninitialized => return Ok(self.skip(SkipReason::NotInitialized)),
            Lifecycle::Disposed => return Ok(self.skip(SkipReason::Disposed)),
        };
        let Some(frustum) = frustum else {
            return Ok(self.skip(SkipReason::MissingFrustum));
        };
        let Some(target) = target else {
            return Ok(self.skip(SkipReason::MissingTarget));
        };

        let layout = &active.layout;
        let required = u64::from(layout.command_count()) * DRAW_COMMAND_SIZE;
        self.backend.validate_target(target, required)?;

        let uniforms = CullUniforms {
            frustum_planes: frustum.as_arrays(),
            global_transform: self.global_transform.into(),
            total_instance_count: layout.total_instance_count(),
            prototype_count: layout.prototype_count(),
            command_count: layout.command_count(),
            bounding_sphere_radius: self.config.bounding_sphere_radius
                * max_axis_scale(&self.global_transform),
        };

        log::trace!(
            "[Frustum Culler] Dispatching {}/{}/{} workgroups",
            active.dispatch.reset_workgroups,
            active.dispatch.cull_workgroups,
            active.dispatch.args_workgroups
        );
        self.backend.run_stages(&active.resources, &uniforms, target)?;

        Ok(CullOutcome::Dispatched {
            instance_lanes: layout.total_instance_count(),
            draw_commands: layout.command_count(),
        })
    }

    fn skip(&self, reason: SkipReason) -> CullOutcome {
        log::debug!(
            "[Frustum Culler] Skipping cull for '{}': {:?}",
            self.config.label,
            reason
        );
        CullOutcome::Skipped(reason)
    }

    /// Release every owned buffer. Safe to call any number of times.
    pub fn dispose(&mut self) {
        match std::mem::replace(&mut self.lifecycle, Lifecycle::Disposed) {
            Lifecycle::Initialized(active) => {
                self.backend.release(active.resources);
                log::info!("[Frustum Culler] Disposed '{}'", self.config.label);
            }
            Lifecycle::Uninitialized | Lifecycle::Disposed => {}
        }
    }

    pub fn state(&self) -> CullerState {
        match self.lifecycle {
            Lifecycle::Uninitialized => CullerState::Uninitialized,
            Lifecycle::Initialized(_) => CullerState::Initialized,
            Lifecycle::Disposed => CullerState::Disposed,
        }
    }

    pub fn config(&self) -> &CullerConfig {
        &self.config
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn layout(&self) -> Option<&PrototypeLayout> {
        match &self.lifecycle {
            Lifecycle::Initialized(active) => Some(&active.layout),
            _ => None,
        }
    }

    pub fn stage_dispatch(&self) -> Option<StageDispatch> {
        match &self.lifecycle {
            Lifecycle::Initialized(active) => Some(active.dispatch),
            _ => None,
        }
    }

    /// Backend resources, e.g. to bind the visible output buffer for drawing
    pub fn resources(&self) -> Option<&B::Resources> {
        match &self.lifecycle {
            Lifecycle::Initialized(active) => Some(&active.resources),
            _ => None,
        }
    }

    fn active(&self) -> CullResult<&ActiveCuller<B::Resources>> {
        match &self.lifecycle {
            Lifecycle::Initialized(active) => Ok(active),
            _ => Err(CullError::NotInitialized {
                state: self.state().as_str(),
            }),
        }
    }

    /// Counters clamped to each bucket's capacity. Lanes whose record was
    /// re-tagged after initialize can push a raw counter past it.
    fn clamped_counts(&self, active: &ActiveCuller<B::Resources>) -> CullResult<Vec<u32>> {
        let counts = self.backend.read_visible_counts(&active.resources)?;
        Ok(counts
            .iter()
            .zip(active.layout.instance_counts())
            .map(|(&visible, &capacity)| visible.min(capacity))
            .collect())
    }

    /// Per-prototype visible counts from the last cull, as written to the
    /// draw arguments
    pub fn visible_counts(&self) -> CullResult<Vec<u32>> {
        let active = self.active()?;
        log::debug!("[Frustum Culler] Reading back visible counts");
        self.clamped_counts(active)
    }

    /// Occupied prefix of one prototype's bucket. Order within it is unspecified.
    pub fn visible_bucket(&self, prototype: u32) -> CullResult<Vec<InstanceRecord>> {
        let active = self.active()?;
        let layout = &active.layout;
        if prototype >= layout.prototype_count() {
            return Err(invalid_config(
                "prototype",
                prototype,
                &format!("culler has {} prototypes", layout.prototype_count()),
            ));
        }

        let counts = self.clamped_counts(active)?;
        let bucket = layout.bucket_range(prototype as usize);
        let occupied = counts[prototype as usize];
        self.backend
            .read_visible_range(&active.resources, bucket.start..bucket.start + occupied)
    }

    /// Draw commands as rewritten by the last cull
    pub fn draw_commands(&self) -> CullResult<Vec<DrawCommand>> {
        let active = self.active()?;
        log::debug!("[Frustum Culler] Reading back staged draw commands");
        self.backend.read_staged_commands(&active.resources)
    }

    pub fn stats(&self) -> CullResult<CullingStats> {
        let active = self.active()?;
        let layout = &active.layout;
        let counts = self.clamped_counts(active)?;
        let commands = self.backend.read_staged_commands(&active.resources)?;
        let empty_draw_commands = commands.iter().filter(|c| c.instance_count == 0).count();

        Ok(CullingStats {
            total_instances: layout.total_instance_count(),
            visible_instances: counts.iter().sum(),
            prototype_count: layout.prototype_count(),
            draw_commands: layout.command_count(),
            empty_draw_commands: empty_draw_commands as u32,
        })
    }
}

impl<B: CullBackend> Drop for FrustumCuller<B> {
    fn drop(&mut self) {
        self.dispose();
    }
}
