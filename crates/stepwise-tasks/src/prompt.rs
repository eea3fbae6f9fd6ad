//! Prompt construction for the research tasks.

use std::fmt::Write as _;

use chrono::{Local, NaiveDate};

/// e.g. `Monday, October 19, 2026`
#[must_use]
pub fn humanized_date(date: NaiveDate) -> String {
    date.format("%A, %B %-d, %Y").to_string()
}

#[must_use]
pub fn today() -> NaiveDate {
    Local::now().date_naive()
}

/// Numbered `## Finding N` sections, one per summary.
#[must_use]
pub fn format_findings(summaries: &[String]) -> String {
    summaries
        .iter()
        .enumerate()
        .map(|(i, summary)| format!("## Finding {}\n\n{}\n", i + 1, summary.trim()))
        .collect::<Vec<_>>()
        .join("\n\n")
}

#[must_use]
pub fn analysis_prompt(question: &str, summaries: &[String], date: NaiveDate) -> String {
    let mut prompt = String::new();
    let _ = write!(
        prompt,
        "# Research Analysis\n\n\
         Today is {date}.\n\n\
         You are a research analyst. Before a comprehensive report on \"{question}\" is written, \
         analyse the findings gathered so far.\n\n\
         ## Research Materials\n\n\
         <research_findings>\n{findings}\n</research_findings>\n\n\
         ## Instructions\n\
         - Work through the findings one at a time and highlight the information the report must use.\n\
         - Structure the analysis so it can serve directly as the outline of the report.\n",
        date = humanized_date(date),
        findings = format_findings(summaries),
    );
    prompt
}

/// Writer prompt. Without an analysis the report is written from the raw
/// findings.
#[must_use]
pub fn writer_prompt(
    question: &str,
    analysis: Option<&str>,
    summaries: &[String],
    date: NaiveDate,
) -> String {
    let mut prompt = String::new();
    let _ = write!(
        prompt,
        "# Research Report\n\n\
         Today is {date}.\n\n\
         Write a comprehensive, well-structured markdown report answering \"{question}\".\n\n",
        date = humanized_date(date),
    );

    match analysis.map(str::trim).filter(|a| !a.is_empty()) {
        Some(analysis) => {
            let _ = write!(prompt, "## Analysis\n\n<analysis>\n{analysis}\n</analysis>\n\n");
        }
        None => {
            prompt.push_str("No prior analysis is available; work directly from the findings.\n\n");
        }
    }

    let _ = write!(
        prompt,
        "## Research Materials\n\n\
         <research_findings>\n{findings}\n</research_findings>\n\n\
         ## Instructions\n\
         - Lead with a direct answer, then support it with the findings.\n\
         - Use headings and lists where they help; avoid repeating the question.\n\
         - Do not invent facts that the findings do not support.\n",
        findings = format_findings(summaries),
    );
    prompt
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 10, 19).unwrap()
    }

    #[test]
    fn test_humanized_date() {
        assert_eq!(humanized_date(date()), "Monday, October 19, 2026");
        assert_eq!(
            humanized_date(NaiveDate::from_ymd_opt(2025, 3, 1).unwrap()),
            "Saturday, March 1, 2025"
        );
    }

    #[test]
    fn test_findings_are_numbered() {
        let findings = format_findings(&["alpha".into(), " beta ".into()]);
        assert!(findings.contains("## Finding 1\n\nalpha"));
        assert!(findings.contains("## Finding 2\n\nbeta"));
        assert_eq!(format_findings(&[]), "");
    }

    #[test]
    fn test_analysis_prompt_contents() {
        let prompt = analysis_prompt("Why is the sky blue?", &["Rayleigh".into()], date());
        assert!(prompt.contains("Monday, October 19, 2026"));
        assert!(prompt.contains("\"Why is the sky blue?\""));
        assert!(prompt.contains("## Finding 1"));
    }

    #[test]
    fn test_writer_prompt_fallback_without_analysis() {
        let with = writer_prompt("q", Some("deep thoughts"), &[], date());
        assert!(with.contains("<analysis>\ndeep thoughts\n</analysis>"));

        let without = writer_prompt("q", Some("   "), &["raw".into()], date());
        assert!(without.contains("No prior analysis"));
        assert!(without.contains("raw"));
    }
}
