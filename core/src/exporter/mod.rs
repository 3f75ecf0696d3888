//! C11 — NotArb exporter: periodic curated JSON export, atomic write.

use std::path::Path;

use chrono::Utc;
use serde::Serialize;
use tracing::{info, warn};

use crate::repository::TokenRepository;
use crate::settings::{keys, Settings};

#[derive(Debug, Serialize)]
struct ExportedToken {
    mint: String,
    symbol: Option<String>,
    score: f64,
    pools: Vec<String>,
}

#[derive(Debug, Serialize)]
struct ExportMetadata {
    min_score_threshold: f64,
}

#[derive(Debug, Serialize)]
struct ExportDocument {
    generated_at: String,
    metadata: ExportMetadata,
    tokens: Vec<ExportedToken>,
}

/// Reads the top active tokens, filters by `notarb_min_score`, and writes
/// them atomically to `path` (write to a temp file, then rename —
/// `spec.md` §4.11/§6). `notarb_max_spam_percentage` is a recognized
/// setting (C1) but is not gated on here: the data model defines no
/// spam/risk metric on `ScoreSnapshot`/`FeatureVector` for it to compare
/// against (see `DESIGN.md`).
pub async fn export(
    repository: &dyn TokenRepository,
    settings: &Settings,
    path: &Path,
    top_n: i64,
) -> anyhow::Result<()> {
    let min_score = settings.get_typed(keys::NOTARB_MIN_SCORE, 0.1).await;

    let candidates = repository.top_active_by_score(top_n).await?;

    let tokens: Vec<ExportedToken> = candidates
        .into_iter()
        .filter(|(_, snapshot)| snapshot.smoothed_total >= min_score)
        .map(|(token, snapshot)| ExportedToken {
            mint: token.mint_address,
            symbol: token.symbol,
            score: snapshot.smoothed_total,
            pools: snapshot
                .metrics
                .pools
                .iter()
                .map(|(_, _, addr, _)| addr.clone())
                .collect(),
        })
        .collect();

    let document = ExportDocument {
        generated_at: Utc::now().to_rfc3339(),
        metadata: ExportMetadata {
            min_score_threshold: min_score,
        },
        tokens,
    };

    write_atomically(path, &document).await?;
    info!(path = %path.display(), "notarb export written");
    Ok(())
}

async fn write_atomically(path: &Path, document: &ExportDocument) -> anyhow::Result<()> {
    let body = serde_json::to_vec_pretty(document)?;
    let tmp_path = path.with_extension("tmp");

    tokio::fs::write(&tmp_path, &body).await?;
    match tokio::fs::rename(&tmp_path, path).await {
        Ok(()) => Ok(()),
        Err(err) => {
            warn!(%err, "atomic rename failed, removing temp file");
            let _ = tokio::fs::remove_file(&tmp_path).await;
            Err(err.into())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::InMemoryTokenRepository;
    use sqlx::PgPool;

    #[tokio::test]
    async fn export_writes_valid_json_with_no_tokens() {
        let repo = InMemoryTokenRepository::new();
        let pool = PgPool::connect_lazy("postgres://localhost/pulsewatch_test").unwrap();
        let settings = Settings::new(pool);

        let dir = std::env::temp_dir();
        let path = dir.join(format!("pulsewatch_export_test_{}.json", uuid::Uuid::new_v4()));

        export(&repo, &settings, &path, 50).await.unwrap();

        let contents = tokio::fs::read_to_string(&path).await.unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&contents).unwrap();
        assert!(parsed["tokens"].as_array().unwrap().is_empty());

        let _ = tokio::fs::remove_file(&path).await;
    }
}
