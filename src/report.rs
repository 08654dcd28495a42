use crate::content::excerpt;
use crate::pipeline::PipelineRun;

const PREVIEW_CHARS: usize = 500;

/// Human-readable summary of a finished run.
pub fn render_report(run: &PipelineRun) -> String {
    let mut out = format!(
        "URL scraped: {}\nMarkdown length: {} chars\nImages: {} found, {} sent for analysis\n",
        run.url,
        run.markdown.chars().count(),
        run.image_references.len(),
        run.images_attached
    );

    if run.apartment.title.trim().is_empty() {
        out.push_str(&format!(
            "\n--- First {} chars of scraped content ---\n\n{}\n",
            PREVIEW_CHARS,
            excerpt(&run.markdown, PREVIEW_CHARS)
        ));
    } else {
        let apartment = serde_json::to_string_pretty(&run.apartment)
            .unwrap_or_else(|_| format!("{:#?}", run.apartment));
        out.push_str(&format!("\n--- Extracted apartment (Broker AI) ---\n\n{}\n", apartment));
    }

    if let Some(analysis) = &run.analysis {
        out.push_str("\n--- Expert analysis (Broker AI) ---\n");
        for (heading, text) in analysis.sections() {
            out.push_str(&format!("\n## {}\n\n{}\n", heading, text.trim()));
        }
    }

    out
}
