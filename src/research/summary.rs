use serde_json::Value;

use super::types::{Property, ResearchModule, ResearchReport};

/// Deterministic executive summary from whichever modules succeeded
pub fn local_summary(property: &Property, report: &ResearchReport) -> String {
    let mut fragments = Vec::new();

    if let Some(details) = report.module(ResearchModule::PropertyDetails) {
        if let Some(fragment) = details_fragment(property, details) {
            fragments.push(fragment);
        }
    }

    if let Some(investment) = report.module(ResearchModule::InvestmentPotential) {
        let cap_rate = investment.get("capRate").and_then(Value::as_f64);
        let irr = investment.get("irr").and_then(Value::as_f64);
        match (cap_rate, irr) {
            (Some(cap), Some(irr)) => {
                fragments.push(format!("Cap rate {:.2}% with an estimated IRR of {:.1}%.", cap, irr))
            }
            (Some(cap), None) => fragments.push(format!("Cap rate {:.2}%.", cap)),
            (None, Some(irr)) => fragments.push(format!("Estimated IRR {:.1}%.", irr)),
            (None, None) => {}
        }
    }

    for module in [ResearchModule::MarketConditions, ResearchModule::RiskAssessment] {
        if let Some(summary) = report
            .module(module)
            .and_then(|v| v.get("summary"))
            .and_then(Value::as_str)
            .filter(|s| !s.trim().is_empty())
        {
            fragments.push(summary.trim().to_string());
        }
    }

    if fragments.is_empty() {
        format!(
            "{} research completed for {} with limited data.",
            capitalize(report.research_depth.as_str()),
            property.label()
        )
    } else {
        fragments.join(" ")
    }
}

fn details_fragment(property: &Property, details: &Value) -> Option<String> {
    let kind = details.get("propertyType").and_then(Value::as_str);
    let units = details.get("units").and_then(Value::as_u64);
    let year = details.get("yearBuilt").and_then(Value::as_i64);
    if kind.is_none() && units.is_none() && year.is_none() {
        return None;
    }

    let mut sentence = format!("{} is a", property.label());
    match kind {
        Some(kind) => sentence.push_str(&format!(" {} property", kind)),
        None => sentence.push_str(" property"),
    }
    if let Some(units) = units {
        sentence.push_str(&format!(" with {} units", units));
    }
    if let Some(year) = year {
        sentence.push_str(&format!(" built in {}", year));
    }
    sentence.push('.');
    Some(sentence)
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}
