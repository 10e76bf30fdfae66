//! System and user prompts for model-backed roles.
//!
//! Models only ever describe a decision that was already made by the
//! classifier; every prompt says so explicitly.

use serde_json::{json, Value};
use signalist_models::{
    Decision, Holding, IndicatorSet, MarketResearch, Position, PriceSeries, Signal,
};

use crate::context::PipelineContext;

const PLAIN_LANGUAGE_RULES: &str = "\
- Write a short, plain-language insight about what's happening\n\
- Use familiar terms like \"gaining steam,\" \"cooling off,\" or \"showing hesitation\"\n\
- Avoid technical jargon like RSI or MACD unless context makes it helpful\n\
- Add a helpful tip or comment (e.g., \"This pattern often signals hesitation\" or \
\"This dip might attract bargain hunters\")";

const DECISION_RULES: &str = "\
The decision was computed from RSI(14) and MACD(12,26,9) over daily closes:\n\
- Buy: RSI < 30 (oversold) AND MACD line > signal line (bullish crossover)\n\
- Sell: RSI > 70 (overbought) AND MACD line < signal line (bearish crossover)\n\
- Hold: every other case\n\
Cite only indicator figures that appear in the rationale; any other indicator \
number is removed from the report.";

pub fn data_retrieval_system_prompt() -> String {
    "You are a market data retrieval agent. You are given price history and company \
     research that was already fetched for one stock. Summarize it in a few sentences: \
     the recent price range, the direction of travel over the window, and anything notable \
     in the company profile, analyst recommendations or headlines. Report only what the \
     data shows; do not make a recommendation."
        .to_string()
}

pub fn technical_system_prompt() -> String {
    format!(
        "You are a technical analysis agent. You are given a decision and the \
         rationale the classifier wrote for it.\n\n{DECISION_RULES}\n\n\
         Explain in two or three sentences why the indicators produced this decision. \
         Do not change or second-guess the decision."
    )
}

pub fn portfolio_system_prompt() -> String {
    "You are a portfolio agent. You are given every holding lot the user owns for one \
     stock, read from their brokerage CSV files. Summarize the position: number of lots, \
     total shares, total and average cost, and the spread of acquisition dates. Use every \
     lot's details, not just the totals."
        .to_string()
}

pub fn narrative_system_prompt() -> String {
    format!(
        "You are a daily stock analysis writer.\n\n{DECISION_RULES}\n\n\
         The decision is final. Never override it and never recompute the indicators.\n\
         {PLAIN_LANGUAGE_RULES}\n\n\
         Do not write a closing summary line; one is appended for you."
    )
}

pub fn position_analysis_system_prompt() -> String {
    format!(
        "You coordinate a portfolio analysis team. Using the team's findings, write a \
         COMPREHENSIVE POSITION ANALYSIS and a detailed OPTIMIZATION STRATEGY for selling \
         down the user's position to avoid being overleveraged. Use all of the user's lot \
         details (not a summary) and give a specific plan of action over a course of time, \
         specifying which lots to sell at what times.\n\n{DECISION_RULES}\n\n\
         The technical decision is final; let it inform the timing of the plan but never \
         override it.\n{PLAIN_LANGUAGE_RULES}\n\n\
         Do not write a closing summary line; one is appended for you."
    )
}

/// Compact description of a price series for prompts.
pub fn series_summary(series: &PriceSeries) -> Value {
    let bars = series.bars();
    let (Some(first), Some(last)) = (bars.first(), bars.last()) else {
        return json!({"ticker": series.ticker(), "bars": 0});
    };
    let high = bars.iter().map(|b| b.high).fold(f64::MIN, f64::max);
    let low = bars.iter().map(|b| b.low).fold(f64::MAX, f64::min);
    let change_pct = if first.close != 0.0 {
        (last.close - first.close) / first.close * 100.0
    } else {
        0.0
    };
    let recent: Vec<Value> = bars
        .iter()
        .rev()
        .take(10)
        .rev()
        .map(|b| json!({"date": b.date, "close": b.close, "volume": b.volume}))
        .collect();

    json!({
        "ticker": series.ticker(),
        "bars": bars.len(),
        "from": first.date,
        "to": last.date,
        "first_close": first.close,
        "last_close": last.close,
        "window_high": high,
        "window_low": low,
        "change_pct": (change_pct * 100.0).round() / 100.0,
        "recent": recent,
    })
}

pub fn data_user_prompt(ticker: &str, series: &PriceSeries, research: &MarketResearch) -> String {
    let input = json!({
        "ticker": ticker,
        "price_history": series_summary(series),
        "research": research,
    });
    format!(
        "Summarize the market data for {ticker}:\n{}",
        serde_json::to_string_pretty(&input).unwrap_or_default()
    )
}

pub fn technical_user_prompt(ticker: &str, signal: &Signal) -> String {
    let input = json!({
        "ticker": ticker,
        "decision": signal.decision.label(),
        "rationale": signal.rationale,
    });
    format!(
        "Explain this technical read:\n{}",
        serde_json::to_string_pretty(&input).unwrap_or_default()
    )
}

pub fn portfolio_user_prompt(ticker: &str, holdings: &[Holding]) -> String {
    let input = json!({
        "ticker": ticker,
        "lots": holdings,
        "position": Position::from_holdings(ticker, holdings),
    });
    format!(
        "Summarize my {ticker} holdings:\n{}",
        serde_json::to_string_pretty(&input).unwrap_or_default()
    )
}

fn team_findings(ctx: &PipelineContext) -> Value {
    json!({
        "findings": ctx
            .narrative_fragments
            .iter()
            .map(|f| json!({"role": f.role, "text": f.text}))
            .collect::<Vec<_>>(),
        "unavailable": ctx.failures,
    })
}

pub fn narrative_user_prompt(ctx: &PipelineContext, signal: &Signal) -> String {
    let input = json!({
        "ticker": ctx.ticker,
        "decision": signal.decision.label(),
        "rationale": signal.rationale,
        "price_history": ctx.price_series.as_ref().map(series_summary),
        "team": team_findings(ctx),
    });
    format!(
        "For the stock ticker {}, describe what's happening.\n{}",
        ctx.ticker,
        serde_json::to_string_pretty(&input).unwrap_or_default()
    )
}

pub fn position_user_prompt(ctx: &PipelineContext, signal: &Signal) -> String {
    let input = json!({
        "ticker": ctx.ticker,
        "decision": signal.decision.label(),
        "rationale": signal.rationale,
        "lots": ctx.holdings,
        "position": ctx.position(),
        "research": ctx.research,
        "team": team_findings(ctx),
    });
    format!(
        "Please give me a COMPREHENSIVE {t} POSITION ANALYSIS & detailed OPTIMIZATION \
         STRATEGY using all of my stock details (not summary) for selling off my {t} \
         portfolio to avoid being overleveraged.\n{}",
        serde_json::to_string_pretty(&input).unwrap_or_default(),
        t = ctx.ticker,
    )
}

/// Narrative written without a model, for deterministic narrative roles.
pub fn plain_narrative(ticker: &str, signal: &Signal, set: Option<&IndicatorSet>) -> String {
    let mood = match (signal.decision, set) {
        (Decision::Buy, _) => format!(
            "{ticker} has been sold off hard, but buyers are starting to step back in. \
             The slide looks like it is losing steam."
        ),
        (Decision::Sell, _) => format!(
            "{ticker} has run up quickly and the rally is starting to cool off. \
             Momentum is fading after a strong stretch."
        ),
        (Decision::Hold, Some(set)) if set.macd_line > set.macd_signal => {
            format!("{ticker} is gaining a little steam, but not enough to call a clear move.")
        }
        (Decision::Hold, Some(set)) if set.macd_line < set.macd_signal => {
            format!("{ticker} is cooling off slightly without being stretched either way.")
        }
        (Decision::Hold, _) => format!("{ticker} is showing hesitation with no clear direction."),
    };
    let tip = match signal.decision {
        Decision::Buy => "Tip: dips like this often attract bargain hunters, but scale in gradually.",
        Decision::Sell => "Tip: consider locking in some gains rather than waiting for the top.",
        Decision::Hold => "Tip: this pattern often signals hesitation; let the next move confirm itself.",
    };
    format!("{mood} {tip}")
}
