//! Checkpoint and restart control of the meshing pipeline
//!
//! Every generator announces each stage with
//! [`run_current_step`](WorkflowControls::run_current_step) before running
//! it.  The controls answer whether the stage should run, should be skipped
//! (it was completed by the run being restarted), or whether the generation
//! must stop because the previous stage was the last one requested.  The
//! ledger of completed steps is stored in the mesh metadata, so a mesh
//! written after a stop carries everything needed to restart from it.
use crate::{config::WorkflowSettings, mesh::PolyMesh, Error};
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Metadata key under which the ledger is stored
pub const WORKFLOW_KEY: &str = "workflowControls";

/// Stages of mesh generation, in execution order
#[derive(
    Copy,
    Clone,
    Debug,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
    strum::EnumIter,
)]
#[strum(serialize_all = "camelCase")]
#[serde(rename_all = "camelCase")]
pub enum Step {
    /// Octree construction and template extraction
    TemplateGeneration,
    /// Topological cleaning of the template
    SurfaceTopology,
    /// Projection of the boundary onto the surface
    SurfaceProjection,
    /// Assignment of boundary faces to surface patches
    PatchAssignment,
    /// Capture of feature edges and corners
    EdgeExtraction,
    /// Extrusion of boundary layers
    BoundaryLayerGeneration,
    /// Mesh untangling and smoothing
    MeshOptimisation,
    /// Splitting of boundary layers into sub-layers
    BoundaryLayerRefinement,
}

/// Persisted state of the controls
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Ledger {
    current_step: Option<Step>,
    restart_after_step: Option<Step>,
    completed_steps: Vec<Step>,
}

fn parse_step(name: &str) -> Result<Step, Error> {
    Step::from_str(name).map_err(|_| Error::UnknownStep(name.to_owned()))
}

/// Step-completion ledger of one generator run
#[derive(Clone, Debug)]
pub struct WorkflowControls {
    ledger: Ledger,
    stop_after: Option<Step>,
    /// Steps done by an earlier run, which are skipped
    skip: Vec<Step>,
}

impl WorkflowControls {
    /// Builds controls for a fresh run
    ///
    /// A restart step cannot be honoured without a checkpoint, so
    /// `restart_after_step` is rejected here; use [`restore`](Self::restore).
    pub fn new(settings: &WorkflowSettings) -> Result<Self, Error> {
        if let Some(s) = &settings.restart_after_step {
            return Err(Error::BadConfig(
                "restart_after_step",
                format!("restarting after `{s}` needs a checkpoint mesh"),
            ));
        }
        Ok(Self {
            ledger: Ledger::default(),
            stop_after: settings.stop_after_step.as_deref().map(parse_step).transpose()?,
            skip: vec![],
        })
    }

    /// Builds controls which continue the run recorded in a checkpoint mesh
    ///
    /// Every step up to and including `restart_after_step` must have been
    /// completed by the earlier run; those steps are skipped.
    pub fn restore(settings: &WorkflowSettings, mesh: &PolyMesh) -> Result<Self, Error> {
        let ledger: Ledger = match mesh.metadata().get(WORKFLOW_KEY) {
            Some(v) => serde_json::from_value(v.clone())?,
            None => Ledger::default(),
        };
        let stop_after = settings.stop_after_step.as_deref().map(parse_step).transpose()?;
        let Some(restart) = settings.restart_after_step.as_deref().map(parse_step).transpose()?
        else {
            return Ok(Self {
                ledger: Ledger::default(),
                stop_after,
                skip: vec![],
            });
        };
        if !ledger.completed_steps.contains(&restart) {
            return Err(Error::BadConfig(
                "restart_after_step",
                format!("step `{restart}` was not completed by the checkpointed run"),
            ));
        }
        let skip: Vec<Step> = ledger
            .completed_steps
            .iter()
            .copied()
            .filter(|s| *s <= restart)
            .collect();
        info!("restarting after step `{restart}`");
        Ok(Self {
            ledger: Ledger {
                current_step: None,
                restart_after_step: Some(restart),
                completed_steps: skip.clone(),
            },
            stop_after,
            skip,
        })
    }

    /// Announces the next step
    ///
    /// Returns `Ok(true)` if the step must run and `Ok(false)` if it was
    /// completed by the run being restarted.  Returns
    /// [`Error::WorkflowStopped`] if the previous step was the one to stop
    /// after.
    pub fn run_current_step(&mut self, name: &str) -> Result<bool, Error> {
        let step = parse_step(name)?;
        self.finish_current();
        if let (Some(stop), Some(last)) = (self.stop_after, self.ledger.completed_steps.last()) {
            if *last >= stop {
                return Err(Error::WorkflowStopped(stop.to_string()));
            }
        }
        if self.skip.contains(&step) {
            debug!("skipping step `{step}`");
            return Ok(false);
        }
        info!("running step `{step}`");
        self.ledger.current_step = Some(step);
        Ok(true)
    }

    /// Moves the current step to the completed list
    fn finish_current(&mut self) {
        if let Some(s) = self.ledger.current_step.take() {
            if !self.ledger.completed_steps.contains(&s) {
                self.ledger.completed_steps.push(s);
            }
        }
    }

    /// Marks the end of the run
    pub fn workflow_completed(&mut self) {
        self.finish_current();
        info!("mesh generation completed");
    }

    /// Returns the steps completed so far
    pub fn completed_steps(&self) -> &[Step] {
        &self.ledger.completed_steps
    }

    /// Returns the step currently running
    pub fn current_step(&self) -> Option<Step> {
        self.ledger.current_step
    }

    /// Writes the ledger into the mesh metadata
    pub fn store(&self, mesh: &mut PolyMesh) -> Result<(), Error> {
        let v = serde_json::to_value(&self.ledger)?;
        mesh.metadata_mut().insert(WORKFLOW_KEY.to_owned(), v);
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use strum::IntoEnumIterator;

    fn settings(stop: Option<&str>, restart: Option<&str>) -> WorkflowSettings {
        WorkflowSettings {
            stop_after_step: stop.map(str::to_owned),
            restart_after_step: restart.map(str::to_owned),
        }
    }

    #[test]
    fn step_names() {
        assert_eq!(Step::TemplateGeneration.to_string(), "templateGeneration");
        assert_eq!(
            parse_step("boundaryLayerRefinement").unwrap(),
            Step::BoundaryLayerRefinement
        );
        assert!(matches!(parse_step("renumbering"), Err(Error::UnknownStep(_))));
        let all: Vec<Step> = Step::iter().collect();
        assert!(all.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn full_run() {
        let mut w = WorkflowControls::new(&WorkflowSettings::default()).unwrap();
        for s in Step::iter() {
            assert!(w.run_current_step(&s.to_string()).unwrap());
            assert_eq!(w.current_step(), Some(s));
        }
        w.workflow_completed();
        assert_eq!(w.completed_steps().len(), Step::iter().count());
        assert_eq!(w.current_step(), None);
    }

    #[test]
    fn stop_and_restart() {
        let mut w = WorkflowControls::new(&settings(Some("surfaceTopology"), None)).unwrap();
        assert!(w.run_current_step("templateGeneration").unwrap());
        assert!(w.run_current_step("surfaceTopology").unwrap());
        assert!(matches!(
            w.run_current_step("surfaceProjection"),
            Err(Error::WorkflowStopped(s)) if s == "surfaceTopology"
        ));

        let mut mesh = PolyMesh::default();
        w.store(&mut mesh).unwrap();
        let ledger = &mesh.metadata()[WORKFLOW_KEY];
        assert_eq!(
            ledger["completedSteps"],
            serde_json::json!(["templateGeneration", "surfaceTopology"])
        );

        // Restarting after a step that never ran is rejected
        assert!(WorkflowControls::restore(&settings(None, Some("edgeExtraction")), &mesh).is_err());

        let mut w = WorkflowControls::restore(&settings(None, Some("surfaceTopology")), &mesh)
            .unwrap();
        assert!(!w.run_current_step("templateGeneration").unwrap());
        assert!(!w.run_current_step("surfaceTopology").unwrap());
        assert!(w.run_current_step("surfaceProjection").unwrap());
        w.workflow_completed();
        assert_eq!(w.completed_steps().len(), 3);
    }

    #[test]
    fn restart_needs_checkpoint() {
        assert!(matches!(
            WorkflowControls::new(&settings(None, Some("templateGeneration"))),
            Err(Error::BadConfig("restart_after_step", _))
        ));
        assert!(matches!(
            WorkflowControls::new(&settings(Some("meshing"), None)),
            Err(Error::UnknownStep(_))
        ));
    }
}
