use serde::Serialize;
use thiserror::Error;
use tracing::{debug, warn};

use crate::watermark::{Watermark, WatermarkKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeVerdict {
    Unchanged,
    Changed,
}

#[derive(Debug, Error)]
pub enum ChangeError {
    #[error("cannot compare a {previous} watermark against a {current} watermark")]
    IncompatibleWatermarkKinds {
        previous: WatermarkKind,
        current: WatermarkKind,
    },
}

/// Decides whether `current` differs from the last published `previous` watermark.
///
/// Timestamps compare by canonical string, identity sets by set equality. A timestamp
/// that moved backwards is still `Changed`.
pub fn detect(previous: &Watermark, current: &Watermark) -> Result<ChangeVerdict, ChangeError> {
    match (previous, current) {
        (Watermark::Timestamp(prior), Watermark::Timestamp(fresh)) => {
            if prior.canonical() == fresh.canonical() {
                return Ok(ChangeVerdict::Unchanged);
            }
            if fresh.instant() < prior.instant() {
                warn!(
                    previous = %prior,
                    current = %fresh,
                    "watermark moved backwards; treating as changed"
                );
            }
            Ok(ChangeVerdict::Changed)
        }
        (Watermark::IdentitySet(prior), Watermark::IdentitySet(fresh)) => {
            if prior == fresh {
                return Ok(ChangeVerdict::Unchanged);
            }
            debug!(
                added = fresh.difference(prior).count(),
                removed = prior.difference(fresh).count(),
                "identity set changed"
            );
            Ok(ChangeVerdict::Changed)
        }
        _ => Err(ChangeError::IncompatibleWatermarkKinds {
            previous: previous.kind(),
            current: current.kind(),
        }),
    }
}
