use chrono::{DateTime, Utc};
use signalist_models::{NarrativeFragment, Report, Signal};
use tracing::warn;

use crate::error::AgentError;
use crate::orchestrator::FinalResult;

/// Formats the final decision, narrative and summary line.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReportAssembler;

impl ReportAssembler {
    /// The narrative is the fragments joined by blank lines, in contribution order.
    /// Sentences citing indicator figures the rationale does not state are dropped.
    pub fn assemble(
        ticker: &str,
        signal: &Signal,
        fragments: &[NarrativeFragment],
        generated_at: DateTime<Utc>,
    ) -> Report {
        let narrative = fragments
            .iter()
            .map(|f| supported_text(&f.role, &f.text, &signal.rationale))
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .collect::<Vec<_>>()
            .join("\n\n");

        Report {
            ticker: ticker.to_string(),
            decision: signal.decision,
            rationale: signal.rationale.clone(),
            narrative,
            summary_line: summary_line(ticker, signal, generated_at),
            generated_at,
            roles: Vec::new(),
        }
    }

    /// Build the report for a finished run, attaching its role reports.
    pub fn from_result(result: &FinalResult, generated_at: DateTime<Utc>) -> Result<Report, AgentError> {
        let ctx = &result.context;
        let signal = ctx
            .signal
            .as_ref()
            .ok_or_else(|| AgentError::Data(format!("run for {} produced no signal", ctx.ticker)))?;
        let mut report = Self::assemble(&ctx.ticker, signal, &ctx.narrative_fragments, generated_at);
        report.roles = result.reports.clone();
        Ok(report)
    }
}

/// `Summary as of October 8, 2025 – COF: Hold. <rationale>`
pub fn summary_line(ticker: &str, signal: &Signal, at: DateTime<Utc>) -> String {
    format!(
        "Summary as of {} – {}: {}. {}",
        at.format("%B %-d, %Y"),
        ticker,
        signal.decision.label(),
        signal.rationale
    )
}

const INDICATOR_TERMS: [&str; 3] = ["rsi", "macd", "histogram"];

/// Sentences of `text` that mention an indicator and cite a number absent
/// from `rationale`. Parameter lists such as `RSI(14)` are not figures.
pub fn unsupported_indicator_claims<'a>(text: &'a str, rationale: &str) -> Vec<&'a str> {
    let allowed = numbers(rationale);
    sentences(text)
        .into_iter()
        .filter(|s| mentions_indicator(s))
        .filter(|s| {
            numbers(s)
                .iter()
                .any(|n| !allowed.iter().any(|a| (a - n).abs() < 1e-9))
        })
        .collect()
}

fn supported_text(role: &str, text: &str, rationale: &str) -> String {
    let unsupported = unsupported_indicator_claims(text, rationale);
    if unsupported.is_empty() {
        return text.to_string();
    }
    warn!(role, dropped = unsupported.len(), "Dropping indicator claims not in the rationale");
    sentences(text)
        .into_iter()
        .filter(|s| !unsupported.iter().any(|u| std::ptr::eq(*u, *s)))
        .collect()
}

/// Split after `.`, `!` or `?` followed by whitespace, and at line breaks.
/// Trailing whitespace stays with its sentence so rejoining is lossless.
fn sentences(text: &str) -> Vec<&str> {
    let mut out = Vec::new();
    let mut start = 0;
    let mut chars = text.char_indices().peekable();
    while let Some((i, c)) = chars.next() {
        let boundary = match c {
            '.' | '!' | '?' => !matches!(chars.peek(), Some((_, next)) if !next.is_whitespace()),
            '\n' => true,
            _ => false,
        };
        if !boundary {
            continue;
        }
        let mut end = i + c.len_utf8();
        while let Some(&(j, w)) = chars.peek() {
            if !w.is_whitespace() {
                break;
            }
            end = j + w.len_utf8();
            chars.next();
        }
        out.push(&text[start..end]);
        start = end;
    }
    if start < text.len() {
        out.push(&text[start..]);
    }
    out
}

fn mentions_indicator(sentence: &str) -> bool {
    let words: Vec<String> = sentence
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(str::to_lowercase)
        .collect();
    words.iter().any(|w| INDICATOR_TERMS.contains(&w.as_str()))
        || words.windows(2).any(|w| w[0] == "signal" && w[1] == "line")
}

/// Unsigned numeric figures in `text`, skipping parenthesised parameter lists.
fn numbers(text: &str) -> Vec<f64> {
    let bytes = text.as_bytes();
    let mut out = Vec::new();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'(' {
            if let Some(len) = parameter_list(&text[i + 1..]) {
                i += len + 2;
                continue;
            }
        }
        let starts_token = i == 0 || !bytes[i - 1].is_ascii_alphanumeric();
        if bytes[i].is_ascii_digit() && starts_token {
            let start = i;
            while i < bytes.len()
                && (bytes[i].is_ascii_digit()
                    || (bytes[i] == b'.' && bytes.get(i + 1).is_some_and(u8::is_ascii_digit)))
            {
                i += 1;
            }
            if let Ok(n) = text[start..i].parse::<f64>() {
                out.push(n);
            }
            continue;
        }
        i += 1;
    }
    out
}

/// Length of `12,26,9)`-style contents up to the closing parenthesis.
fn parameter_list(rest: &str) -> Option<usize> {
    let end = rest.find(')')?;
    let inner = &rest[..end];
    let is_list = inner.bytes().any(|b| b.is_ascii_digit())
        && inner.bytes().all(|b| b.is_ascii_digit() || b == b',' || b == b' ');
    is_list.then_some(end)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use signalist_models::Decision;

    fn at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 10, 8, 21, 30, 0).unwrap()
    }

    fn buy() -> Signal {
        Signal {
            decision: Decision::Buy,
            rationale: "RSI 24.1 is oversold and the MACD line is above its signal line, a bullish crossover.".into(),
        }
    }

    #[test]
    fn summary_line_format() {
        assert_eq!(
            summary_line("COF", &buy(), at()),
            "Summary as of October 8, 2025 – COF: Buy. RSI 24.1 is oversold and the MACD line \
             is above its signal line, a bullish crossover."
        );
    }

    #[test]
    fn narrative_joins_fragments_in_order() {
        let fragments = vec![
            NarrativeFragment { role: "history".into(), text: "Prices slid all month.".into() },
            NarrativeFragment { role: "empty".into(), text: "  ".into() },
            NarrativeFragment { role: "summary".into(), text: "The slide is losing steam.\n".into() },
        ];
        let report = ReportAssembler::assemble("COF", &buy(), &fragments, at());
        assert_eq!(report.narrative, "Prices slid all month.\n\nThe slide is losing steam.");
        assert_eq!(report.decision, Decision::Buy);
        assert!(report.render(true).ends_with(&format!("{}\n", report.summary_line)));
    }

    fn hold() -> Signal {
        Signal {
            decision: Decision::Hold,
            rationale: "No buy or sell condition is met: RSI 50.0 with the MACD line above its signal line."
                .into(),
        }
    }

    #[test]
    fn indicator_figures_missing_from_rationale_are_dropped() {
        let fragments = vec![
            NarrativeFragment {
                role: "technical".into(),
                text: "Technical read for ACME: RSI(14) 50.0, MACD line 1.234 vs signal 0.432 \
                       (histogram +0.802). Decision: Hold."
                    .into(),
            },
            NarrativeFragment {
                role: "history".into(),
                text: "Last close 61.68 after a 38.3% slide. The RSI sits at 50.0.".into(),
            },
        ];
        let report = ReportAssembler::assemble("ACME", &hold(), &fragments, at());
        assert_eq!(
            report.narrative,
            "Decision: Hold.\n\nLast close 61.68 after a 38.3% slide. The RSI sits at 50.0."
        );
        assert!(unsupported_indicator_claims(&report.narrative, &report.rationale).is_empty());
    }

    #[test]
    fn rationale_figures_and_parameters_are_supported() {
        let rationale = buy().rationale;
        assert!(unsupported_indicator_claims("RSI(14) reads 24.1, so it is oversold.", &rationale).is_empty());
        assert!(unsupported_indicator_claims("MACD (12, 26, 9) turned up.", &rationale).is_empty());
        assert_eq!(
            unsupported_indicator_claims("Prices fell 4.2%. RSI is near 22.", &rationale),
            ["RSI is near 22."]
        );
    }

    #[test]
    fn sentence_split_keeps_decimals_and_whitespace() {
        let text = "Close 12.50 today.  Next line\nRSI 24.1!";
        assert_eq!(sentences(text), ["Close 12.50 today.  ", "Next line\n", "RSI 24.1!"]);
        assert_eq!(sentences(text).concat(), text);
    }

    #[test]
    fn empty_narrative_is_allowed() {
        let report = ReportAssembler::assemble("COF", &buy(), &[], at());
        assert!(report.narrative.is_empty());
        assert!(report.summary_line.starts_with("Summary as of October 8, 2025"));
    }
}
