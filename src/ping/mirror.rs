use bevy::prelude::*;

use super::{MarkerDestroyed, MarkerId, MarkerView, MarkerVisibilityChanged, PingGates};
use crate::config::CommsConfig;
use crate::logging;
use crate::visibility::{ping_visible, ObserverView};

/// A marker as the local instance sees it.
#[derive(Debug, Clone, PartialEq)]
pub struct KnownMarker {
    pub view: MarkerView,
    pub visible: bool,
    /// Local clock time the host tore the marker off
    pub pending_since: Option<f64>,
}

/// Local mirror of the markers the host replicated here.
///
/// Visibility is re-evaluated against the local filters whenever they or
/// the local team change, without waiting for the host.
#[derive(Resource, Debug, Default)]
pub struct KnownMarkers {
    markers: Vec<KnownMarker>,
}

impl KnownMarkers {
    pub fn get(&self, id: MarkerId) -> Option<&KnownMarker> {
        self.markers.iter().find(|m| m.view.id == id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &KnownMarker> {
        self.markers.iter()
    }

    pub fn visible(&self) -> impl Iterator<Item = &MarkerView> {
        self.markers.iter().filter(|m| m.visible).map(|m| &m.view)
    }

    pub fn len(&self) -> usize {
        self.markers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.markers.is_empty()
    }

    pub fn on_spawned(
        &mut self,
        view: MarkerView,
        observer: &ObserverView,
    ) -> Option<MarkerVisibilityChanged> {
        let visible = ping_visible(&view, observer);
        let was_visible = match self.markers.iter_mut().find(|m| m.view.id == view.id) {
            Some(known) => {
                let was = known.visible;
                known.view = view.clone();
                known.visible = visible;
                known.pending_since = None;
                was
            }
            None => {
                self.markers.push(KnownMarker {
                    view: view.clone(),
                    visible,
                    pending_since: None,
                });
                false
            }
        };
        (visible != was_visible).then_some(MarkerVisibilityChanged {
            marker: view,
            visible,
        })
    }

    /// The host let go of the marker; it stays shown until its gate opens.
    pub fn on_torn_off(&mut self, id: MarkerId, now: f64) -> bool {
        match self
            .markers
            .iter_mut()
            .find(|m| m.view.id == id && m.pending_since.is_none())
        {
            Some(known) => {
                known.pending_since = Some(now);
                true
            }
            None => false,
        }
    }

    pub fn on_withdrawn(&mut self, id: MarkerId) -> Option<MarkerVisibilityChanged> {
        let index = self.markers.iter().position(|m| m.view.id == id)?;
        let known = self.markers.remove(index);
        known.visible.then_some(MarkerVisibilityChanged {
            marker: known.view,
            visible: false,
        })
    }

    /// Re-run the filter over every known marker that is not on its way out.
    pub fn refresh(&mut self, observer: &ObserverView) -> Vec<MarkerVisibilityChanged> {
        let mut changed = Vec::new();
        for known in self.markers.iter_mut().filter(|m| m.pending_since.is_none()) {
            let visible = ping_visible(&known.view, observer);
            if visible != known.visible {
                known.visible = visible;
                changed.push(MarkerVisibilityChanged {
                    marker: known.view.clone(),
                    visible,
                });
            }
        }
        changed
    }

    /// Finish markers whose destroy phase is over.
    pub fn poll_pending(
        &mut self,
        now: f64,
        config: &CommsConfig,
        gates: &PingGates,
    ) -> (Vec<MarkerDestroyed>, Vec<MarkerVisibilityChanged>) {
        let mut destroyed = Vec::new();
        let mut hidden = Vec::new();
        self.markers.retain(|known| {
            let Some(since) = known.pending_since else {
                return true;
            };
            if !gates.is_ready(config, &known.view, now - since) {
                return true;
            }
            if known.visible {
                hidden.push(MarkerVisibilityChanged {
                    marker: known.view.clone(),
                    visible: false,
                });
            }
            destroyed.push(MarkerDestroyed {
                marker: known.view.id,
            });
            false
        });
        if !destroyed.is_empty() {
            trace!(target: logging::PING, "{} markers finished locally", destroyed.len());
        }
        (destroyed, hidden)
    }

    /// Forget every marker. Used when the host starts this participant's
    /// view over with a roster snapshot.
    pub fn clear(&mut self) -> (Vec<MarkerDestroyed>, Vec<MarkerVisibilityChanged>) {
        let mut destroyed = Vec::with_capacity(self.markers.len());
        let mut hidden = Vec::new();
        for known in self.markers.drain(..) {
            if known.visible {
                hidden.push(MarkerVisibilityChanged {
                    marker: known.view.clone(),
                    visible: false,
                });
            }
            destroyed.push(MarkerDestroyed {
                marker: known.view.id,
            });
        }
        (destroyed, hidden)
    }
}
