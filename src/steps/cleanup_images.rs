//! Prune old local build tags, keeping the newest three so rollbacks
//! stay cheap.

use crate::context::Context;
use crate::errors::Result;
use crate::steps::run_local;

pub const LABEL: &str = "cleanup_images";

const KEEP_TAGS: usize = 3;

/// Tags to delete given `docker images` output order (newest first).
/// `latest` and unresolved tags are never touched.
fn stale_tags(tags: &[&str]) -> Vec<String> {
    tags.iter()
        .filter(|tag| **tag != "latest" && **tag != "<none>")
        .skip(KEEP_TAGS)
        .map(|tag| tag.to_string())
        .collect()
}

pub async fn run(ctx: &mut Context<'_>) -> Result<()> {
    let prefix = ctx.prefix.clone();
    let listing = run_local(
        "docker",
        &["images", &prefix, "--format", "{{.Tag}}"],
        ctx.observer,
        "cleanup",
    )
    .await?;

    let tags: Vec<&str> = listing.lines().map(str::trim).filter(|l| !l.is_empty()).collect();
    for tag in stale_tags(&tags) {
        let image = format!("{}:{}", prefix, tag);
        ctx.step_detail(LABEL, &format!("removing {}", image));
        if let Err(err) = run_local("docker", &["rmi", &image], ctx.observer, "cleanup").await {
            tracing::warn!("could not remove {}: {}", image, err);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keeps_latest_three_tags() {
        let tags = vec!["abc111", "abc222", "abc333", "abc444", "abc555"];
        assert_eq!(stale_tags(&tags), vec!["abc444", "abc555"]);
    }

    #[test]
    fn test_excludes_latest_and_unresolved() {
        let tags = vec!["latest", "<none>", "abc111", "abc222", "abc333", "abc444"];
        assert_eq!(stale_tags(&tags), vec!["abc444"]);
    }

    #[test]
    fn test_nothing_to_remove_under_limit() {
        let tags = vec!["abc111", "abc222"];
        assert!(stale_tags(&tags).is_empty());
    }
}
