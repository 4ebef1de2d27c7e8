use std::sync::{Arc, PoisonError, RwLock};

use tracing::{debug, info, warn};

use super::player::MediaPlayer;
use crate::chat::TimestampRef;

/// Turns activated timestamp references into seek commands
///
/// Without an attached player every call is a no-op, so timestamp controls
/// can also be rendered as passive markers for text-only documents.
#[derive(Default)]
pub struct TimestampPlaybackBridge {
    player: RwLock<Option<Arc<dyn MediaPlayer>>>,
}

impl TimestampPlaybackBridge {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_player(player: Arc<dyn MediaPlayer>) -> Self {
        Self {
            player: RwLock::new(Some(player)),
        }
    }

    /// Attach a player, replacing any previous one
    pub fn attach(&self, player: Arc<dyn MediaPlayer>) {
        info!("Attaching media player: {}", player.name());
        *self.player.write().unwrap_or_else(PoisonError::into_inner) = Some(player);
    }

    /// Detach and return the current player
    pub fn detach(&self) -> Option<Arc<dyn MediaPlayer>> {
        self.player
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    pub fn is_attached(&self) -> bool {
        self.player
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// Jump to the referenced moment and make sure it is playing
    pub async fn seek(&self, reference: &TimestampRef) {
        let player = self
            .player
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();

        let Some(player) = player else {
            debug!("No media attached, ignoring timestamp {:.2}s", reference.start);
            return;
        };

        if !reference.start.is_finite() {
            warn!("Ignoring timestamp with invalid offset: {}", reference.start);
            return;
        }
        let position = reference.start.max(0.0);

        if let Err(e) = player.seek(position).await {
            warn!("{}: seek to {:.2}s failed: {}", player.name(), position, e);
            return;
        }

        if !player.is_playing() {
            if let Err(e) = player.play().await {
                warn!("{}: play failed: {}", player.name(), e);
            }
        }
    }
}
