use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use crate::{
    display::overlays::{OverlayRenderer, Placement},
    Error, Result,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RenderEvent {
    Spawn { id: u32, asset: PathBuf, at: Placement },
    Kill(u32),
}

/// Renderer that hands out numbered handles and records every call.
#[derive(Debug, Default)]
pub struct RecordingRenderer {
    pub events: Vec<RenderEvent>,
    pub live: BTreeSet<u32>,
    pub fail_spawns: bool,
    pub fail_kills: bool,
    next_id: u32,
}

impl RecordingRenderer {
    pub fn spawn_count(&self) -> usize {
        self.events
            .iter()
            .filter(|event| matches!(event, RenderEvent::Spawn { .. }))
            .count()
    }

    pub fn kill_count(&self) -> usize {
        self.events
            .iter()
            .filter(|event| matches!(event, RenderEvent::Kill(_)))
            .count()
    }

    /// Assets of the overlays still running, in spawn order.
    pub fn live_assets(&self) -> Vec<PathBuf> {
        self.events
            .iter()
            .filter_map(|event| match event {
                RenderEvent::Spawn { id, asset, .. } if self.live.contains(id) => {
                    Some(asset.clone())
                }
                _ => None,
            })
            .collect()
    }
}

impl OverlayRenderer for RecordingRenderer {
    type Handle = u32;

    fn spawn(&mut self, asset: &Path, at: Placement) -> Result<u32> {
        if self.fail_spawns {
            return Err(Error::Command("pngview: not found".into()));
        }
        self.next_id += 1;
        let id = self.next_id;
        self.events.push(RenderEvent::Spawn {
            id,
            asset: asset.to_path_buf(),
            at,
        });
        self.live.insert(id);
        Ok(id)
    }

    fn kill(&mut self, handle: u32) -> Result<()> {
        self.events.push(RenderEvent::Kill(handle));
        self.live.remove(&handle);
        if self.fail_kills {
            return Err(Error::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "no such process",
            )));
        }
        Ok(())
    }
}
