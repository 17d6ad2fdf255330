//! The bake pipeline.
//!
//! A bake runs these stages in order:
//!
//! 1. [`collect`]: gather mesh renderers under the selection, drop LOD
//!    duplicates and snapshot skinned meshes
//! 2. [`group`]: one output texture per material (or one shared)
//! 3. [`cache`]: rasterize world position and normal per texel
//! 4. [`integrate`]: average visibility over sphere directions
//!    (skipped when converting normals)
//! 5. [`post`]: AO bias or normal-space remap
//! 6. [`dilate`]: grow texels into the background
//! 7. [`output`]: composite, encode PNG and write
//!
//! Every target the bake allocates is released before [`Baker::bake`]
//! returns, whatever the outcome.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use bnao::prelude::*;
//!
//! let mut scene = Scene::new();
//! let mat = scene.add_material(Material::new("Ground"));
//! let node = scene.add_renderer("Ground", None, Mat4::IDENTITY,
//!     Renderer::new_static(Arc::new(Mesh::quad(4.0)), [mat]));
//!
//! let config = BakeConfig { bake_mode: BakeMode::AmbientOcclusion, ..Default::default() };
//! let outcome = Baker::new(config)
//!     .bake(&mut scene, &[node], &mut SoftwareBackend::new(), &mut FsStorage::new("."))
//!     .unwrap();
//! println!("{outcome:?}");
//! ```

pub mod cache;
pub mod collect;
pub mod dilate;
pub mod directions;
pub mod group;
pub mod integrate;
pub mod output;
pub mod post;

pub use collect::{Collected, MeshInstance};
pub use directions::sphere_directions;
pub use group::{BakeGroup, GroupKey, GroupPlan};

use std::path::PathBuf;

use crate::config::{BakeConfig, WriteFailurePolicy};
use crate::progress::{CancellationToken, NoProgress, Progress, ProgressStage, ProgressUpdate};
use crate::render::{Program, RenderBackend, TargetFormat, TargetId, TargetLedger};
use crate::scene::{NodeId, Scene};
use crate::storage::Storage;
use crate::util::{Error, Result};

use integrate::IntegrationTargets;

/// A file that could not be written.
#[derive(Debug)]
pub struct WriteFailure {
    pub path: PathBuf,
    pub error: Error,
}

/// What a finished bake produced.
#[derive(Debug, Default)]
pub struct BakeReport {
    /// Written files, in group order.
    pub written: Vec<PathBuf>,
    /// Groups whose file failed under [`WriteFailurePolicy::Isolate`].
    pub failures: Vec<WriteFailure>,
}

impl BakeReport {
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}

#[derive(Debug)]
pub enum BakeOutcome {
    /// The selection held no bakeable mesh. Nothing was allocated or written.
    NothingToBake,
    Completed(BakeReport),
}

impl BakeOutcome {
    pub fn report(&self) -> Option<&BakeReport> {
        match self {
            BakeOutcome::NothingToBake => None,
            BakeOutcome::Completed(report) => Some(report),
        }
    }
}

/// Programs a bake with this config will run.
pub fn required_programs(config: &BakeConfig) -> Vec<Program> {
    let mut programs = vec![Program::DataCache];
    if config.integrates() {
        programs.push(Program::Depth(integrate::depth_shading(config)));
        programs.push(Program::Accumulate);
    }
    programs.extend([Program::PostProcess, Program::Dilate, Program::Composite]);
    programs
}

/// Configured bake, reusable across selections.
pub struct Baker<'p> {
    config: BakeConfig,
    progress: Box<dyn Progress + 'p>,
    cancel: CancellationToken,
}

impl<'p> Baker<'p> {
    pub fn new(config: BakeConfig) -> Self {
        Self {
            config,
            progress: Box::new(NoProgress),
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_progress(mut self, progress: impl Progress + 'p) -> Self {
        self.progress = Box::new(progress);
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn config(&self) -> &BakeConfig {
        &self.config
    }

    /// Bake every mesh under `selection`.
    ///
    /// Fails before touching the backend when the config is invalid, a
    /// selected node is not in `scene`, or a required program is missing. Renderer enable states of `scene` are
    /// changed only while sampling and restored afterwards.
    pub fn bake<B, S>(
        &mut self,
        scene: &mut Scene,
        selection: &[NodeId],
        backend: &mut B,
        storage: &mut S,
    ) -> Result<BakeOutcome>
    where
        B: RenderBackend + ?Sized,
        S: Storage + ?Sized,
    {
        self.config.validate()?;
        scene.check_nodes(selection)?;
        if let Some(&missing) = required_programs(&self.config).iter().find(|&&p| !backend.has_program(p)) {
            return Err(Error::MissingProgram(missing));
        }

        self.report(ProgressStage::Collecting, 0, 1);
        let collected = collect::collect(scene, selection);
        let plans = group::plan_groups(&collected, self.config.force_shared_texture);
        if plans.is_empty() {
            tracing::info!("nothing to bake in selection");
            return Ok(BakeOutcome::NothingToBake);
        }
        tracing::info!(
            "{}: {} mesh(es) in {} group(s) at {}x{}",
            self.config.bake_mode.title(),
            collected.len(),
            plans.len(),
            self.config.bake_res,
            self.config.bake_res
        );

        let mut ledger = TargetLedger::new();
        let result = self.run(scene, &collected, plans, backend, storage, &mut ledger);
        ledger.release_all(backend);
        result.map(BakeOutcome::Completed)
    }

    fn run<B, S>(
        &mut self,
        scene: &mut Scene,
        collected: &Collected,
        plans: Vec<GroupPlan>,
        backend: &mut B,
        storage: &mut S,
        ledger: &mut TargetLedger,
    ) -> Result<BakeReport>
    where
        B: RenderBackend + ?Sized,
        S: Storage + ?Sized,
    {
        let size = self.config.bake_res.get();
        let groups = group::allocate(plans, size, backend, ledger)?;
        let scratch = ledger.create(backend, "scratch", size, TargetFormat::Color)?;
        let depth = if self.config.integrates() {
            Some(ledger.create(backend, "shadow_map", self.config.shadow_map_res.get(), TargetFormat::Depth)?)
        } else {
            None
        };

        self.checkpoint(ProgressStage::DataCache, 0, 1)?;
        cache::render_data_cache(scene, &groups, &self.config, backend)?;

        if let Some(depth) = depth {
            integrate::integrate(
                scene,
                &groups,
                &collected.bounds(),
                &self.config,
                backend,
                IntegrationTargets { scratch, depth },
                self.progress.as_mut(),
                &self.cancel,
            )?;
        }

        self.checkpoint(ProgressStage::PostProcess, 0, 1)?;
        post::post_process(scene, &groups, &self.config, backend, scratch)?;

        self.checkpoint(ProgressStage::Dilation, 0, 1)?;
        dilate::dilate_groups(&groups, backend, scratch, self.config.dilation)?;

        self.write(&groups, backend, storage, scratch)
    }

    fn write<B, S>(
        &mut self,
        groups: &[BakeGroup],
        backend: &mut B,
        storage: &mut S,
        scratch: TargetId,
    ) -> Result<BakeReport>
    where
        B: RenderBackend + ?Sized,
        S: Storage + ?Sized,
    {
        let mut report = BakeReport::default();
        for (i, group) in groups.iter().enumerate() {
            self.checkpoint(ProgressStage::Writing, i as u32, groups.len() as u32)?;
            let (path, bytes) = output::render_group(group, &self.config, backend, scratch)?;
            match storage.write(&path, &bytes) {
                Ok(()) => {
                    tracing::debug!("wrote {}", path.display());
                    report.written.push(path);
                }
                Err(error) if self.config.write_failure == WriteFailurePolicy::Isolate => {
                    tracing::error!("failed to write {}: {error}", path.display());
                    report.failures.push(WriteFailure { path, error });
                }
                Err(error) => return Err(error),
            }
        }
        storage.refresh();
        tracing::info!("wrote {} of {} texture(s)", report.written.len(), groups.len());
        Ok(report)
    }

    fn report(&mut self, stage: ProgressStage, done: u32, total: u32) {
        self.progress.report(&ProgressUpdate {
            title: self.config.bake_mode.title(),
            stage,
            done,
            total,
        });
    }

    /// Report a stage boundary, failing if the bake was cancelled.
    fn checkpoint(&mut self, stage: ProgressStage, done: u32, total: u32) -> Result<()> {
        if self.cancel.is_cancelled() {
            tracing::info!("bake cancelled before {stage}");
            return Err(Error::Cancelled);
        }
        self.report(stage, done, total);
        Ok(())
    }
}

/// One-shot bake with a fresh [`Baker`].
pub fn bake<B, S>(
    config: BakeConfig,
    scene: &mut Scene,
    selection: &[NodeId],
    backend: &mut B,
    storage: &mut S,
) -> Result<BakeOutcome>
where
    B: RenderBackend + ?Sized,
    S: Storage + ?Sized,
{
    Baker::new(config).bake(scene, selection, backend, storage)
}
