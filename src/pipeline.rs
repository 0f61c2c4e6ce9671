use crate::chunker::TextSplitter;
use crate::config::{SiteConfig, PROGRESS_INTERVAL};
use crate::exclusions::ExclusionRules;
use crate::markup::{clean_wikitext, is_redirect_text};
use crate::models::Passage;
use crate::namespace::NamespaceCatalog;
use crate::parser::DumpReader;
use crate::stats::PipelineStats;
use anyhow::{Context, Result};
use indicatif::ProgressBar;
use std::path::Path;
use tracing::info;

/// Second streaming pass: filter pages, clean markup, and chunk into
/// passages. Pages are processed in source order and passages inherit that
/// order, so repeated runs over the same export produce identical output.
#[allow(clippy::too_many_arguments)]
pub fn collect_passages(
    input: &Path,
    catalog: &NamespaceCatalog,
    rules: &ExclusionRules,
    splitter: &TextSplitter,
    site: &SiteConfig,
    limit: Option<u64>,
    stats: &PipelineStats,
) -> Result<Vec<Passage>> {
    let reader = DumpReader::open(input)
        .with_context(|| format!("Failed to open export at: {}", input.display()))?;
    let pb = ProgressBar::new_spinner();

    info!("Chunking pages from: {}", input.display());

    let mut passages = Vec::new();
    let mut seen: u64 = 0;

    for raw in reader {
        seen += 1;
        if seen % PROGRESS_INTERVAL == 0 {
            pb.tick();
        }
        if let Some(limit) = limit {
            if seen > limit {
                break;
            }
        }
        stats.inc_pages_seen();

        let Some(page) = raw.into_page() else {
            stats.inc_pages_skipped();
            continue;
        };

        if page.is_redirect || is_redirect_text(&page.text) {
            stats.inc_redirects_skipped();
            continue;
        }

        let ns_name = catalog.name_for(&page.ns, &page.title);
        if rules.is_excluded_namespace(&ns_name) || rules.is_excluded_namespace_id(&page.ns) {
            stats.inc_pages_excluded();
            continue;
        }

        if rules.is_excluded_contributor(page.earliest_contributor()) {
            stats.inc_contributors_excluded();
            continue;
        }

        let text = clean_wikitext(&page.text);
        if text.is_empty() {
            continue;
        }

        let url = site.curid_url(&page.id);
        let page_passages = splitter.split_page(&page.id, &page.title, &url, &ns_name, &text);

        stats.add_passages(page_passages.len() as u64);
        for passage in &page_passages {
            if passage.content.chars().count() > splitter.chunk_size() {
                stats.inc_oversize_passages();
            }
        }
        passages.extend(page_passages);
    }

    pb.finish_and_clear();

    info!(
        pages = stats.pages(),
        passages = passages.len(),
        excluded = stats.excluded(),
        "Chunking pass complete"
    );

    Ok(passages)
}
