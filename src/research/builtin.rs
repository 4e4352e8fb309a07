//! Small deterministic enrichers so the pipeline runs without external
//! analysis services. They read the serialized [`Property`] fields.
//!
//! [`Property`]: super::Property

use anyhow::Result;
use async_trait::async_trait;
use chrono::{Datelike, Utc};
use serde_json::{json, Value};

use super::collaborators::{InvestmentAnalyzer, MarketAnalyzer, PropertyProfiler, RiskAssessor};
use super::types::ResearchDepth;
use crate::geocoding::city_center;

/// Assumed annual appreciation added to the cap rate for a rough IRR
const ASSUMED_APPRECIATION_PCT: f64 = 3.0;

/// States with elevated flood exposure
const FLOOD_STATES: &[&str] = &["FL", "LA", "TX", "SC", "NC", "MS", "AL"];

fn num(property: &Value, field: &str) -> Option<f64> {
    property.get(field).and_then(Value::as_f64)
}

fn text<'a>(property: &'a Value, field: &str) -> Option<&'a str> {
    property
        .get(field)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

fn building_age(property: &Value) -> Option<i64> {
    property
        .get("yearBuilt")
        .and_then(Value::as_i64)
        .map(|year| (Utc::now().year() as i64 - year).max(0))
}

#[derive(Debug, Clone, Copy, Default)]
pub struct BasicProfiler;

#[async_trait]
impl PropertyProfiler for BasicProfiler {
    async fn profile(&self, property: &Value, depth: ResearchDepth) -> Result<Value> {
        let price = num(property, "price");
        let units = num(property, "units").filter(|u| *u > 0.0);
        let square_feet = num(property, "squareFeet").filter(|s| *s > 0.0);

        let mut profile = json!({
            "propertyType": text(property, "propertyType"),
            "units": property.get("units").cloned().unwrap_or(Value::Null),
            "yearBuilt": property.get("yearBuilt").cloned().unwrap_or(Value::Null),
            "squareFeet": square_feet,
            "age": building_age(property),
            "pricePerUnit": price.zip(units).map(|(p, u)| round2(p / u)),
            "pricePerSqft": price.zip(square_feet).map(|(p, s)| round2(p / s)),
        });

        if depth >= ResearchDepth::Comprehensive {
            const FIELDS: &[&str] = &[
                "address", "city", "state", "zipCode", "propertyType", "units",
                "yearBuilt", "squareFeet", "price", "annualIncome", "annualExpenses",
            ];
            let known = FIELDS
                .iter()
                .filter(|f| property.get(**f).is_some_and(|v| !v.is_null()))
                .count();
            profile["dataCompleteness"] = json!(round2(known as f64 / FIELDS.len() as f64));
        }

        Ok(profile)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct BasicInvestmentAnalyzer;

#[async_trait]
impl InvestmentAnalyzer for BasicInvestmentAnalyzer {
    async fn analyze(&self, property: &Value) -> Result<Value> {
        let price = num(property, "price").filter(|p| *p > 0.0);
        let income = num(property, "annualIncome");
        let expenses = num(property, "annualExpenses").unwrap_or(0.0);

        let (Some(price), Some(income)) = (price, income) else {
            return Ok(json!({
                "capRate": null,
                "irr": null,
                "summary": "Insufficient pricing or income data for investment metrics.",
            }));
        };

        let noi = income - expenses;
        let cap_rate = noi / price * 100.0;
        let gross_yield = income / price * 100.0;
        let irr = cap_rate + ASSUMED_APPRECIATION_PCT;

        Ok(json!({
            "netOperatingIncome": round2(noi),
            "capRate": round2(cap_rate),
            "grossYield": round2(gross_yield),
            "irr": round2(irr),
            "summary": format!("Cap rate of {:.2}% on a net operating income of ${:.0}.", cap_rate, noi),
        }))
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct BasicMarketAnalyzer;

#[async_trait]
impl MarketAnalyzer for BasicMarketAnalyzer {
    async fn analyze_market(&self, property: &Value, depth: ResearchDepth) -> Result<Value> {
        let city = text(property, "city");
        let state = text(property, "state");
        let location = [city, state].into_iter().flatten().collect::<Vec<_>>().join(", ");
        if location.is_empty() {
            anyhow::bail!("market analysis needs a city or state");
        }

        let major_metro = city.is_some_and(|c| city_center(c, state).is_some());
        let tier = if major_metro { "major_metro" } else { "secondary" };

        let mut market = json!({
            "location": location,
            "marketTier": tier,
            "summary": format!(
                "{} is a {} market.",
                location,
                if major_metro { "major metropolitan" } else { "secondary" }
            ),
        });
        if depth >= ResearchDepth::Comprehensive {
            market["liquidity"] = json!(if major_metro { "high" } else { "moderate" });
        }
        Ok(market)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct BasicRiskAssessor;

#[async_trait]
impl RiskAssessor for BasicRiskAssessor {
    async fn assess(&self, property: &Value, _depth: ResearchDepth) -> Result<Value> {
        let mut score: f64 = 20.0;
        let mut factors = Vec::new();

        match building_age(property) {
            Some(age) if age > 50 => {
                score += 25.0;
                factors.push(format!("building is {} years old", age));
            }
            Some(age) if age > 25 => {
                score += 10.0;
                factors.push(format!("building is {} years old", age));
            }
            Some(_) => {}
            None => {
                score += 10.0;
                factors.push("construction year unknown".to_string());
            }
        }

        if text(property, "state").is_some_and(|s| FLOOD_STATES.iter().any(|f| f.eq_ignore_ascii_case(s))) {
            score += 15.0;
            factors.push("state with elevated flood exposure".to_string());
        }

        if let (Some(income), Some(expenses)) = (num(property, "annualIncome"), num(property, "annualExpenses")) {
            if income > 0.0 && expenses / income > 0.6 {
                score += 15.0;
                factors.push("expense ratio above 60%".to_string());
            }
        }

        let score = score.min(100.0);
        let level = match score {
            s if s >= 60.0 => "high",
            s if s >= 35.0 => "moderate",
            _ => "low",
        };

        Ok(json!({
            "riskScore": score,
            "riskLevel": level,
            "factors": factors,
            "summary": format!("Overall risk is {} (score {:.0}/100).", level, score),
        }))
    }

    async fn insurance_requirements(&self, property: &Value, risk: &Value) -> Result<Value> {
        let flood = text(property, "state")
            .is_some_and(|s| FLOOD_STATES.iter().any(|f| f.eq_ignore_ascii_case(s)));
        let level = risk.get("riskLevel").and_then(Value::as_str).unwrap_or("moderate");
        Ok(json!({
            "propertyCoverage": num(property, "price"),
            "floodInsurance": flood,
            "umbrellaPolicy": level != "low",
        }))
    }

    async fn risk_vs_reward(&self, risk: &Value, investment: &Value) -> Result<Value> {
        let score = risk
            .get("riskScore")
            .and_then(Value::as_f64)
            .ok_or_else(|| anyhow::anyhow!("risk score missing"))?;
        let Some(cap_rate) = investment.get("capRate").and_then(Value::as_f64) else {
            return Ok(json!({ "riskScore": score, "verdict": "insufficient_data" }));
        };

        // Cap-rate points earned per 10 points of risk
        let ratio = round2(cap_rate / (score / 10.0).max(1.0));
        let verdict = match ratio {
            r if r >= 1.5 => "favorable",
            r if r >= 0.8 => "balanced",
            _ => "unfavorable",
        };
        Ok(json!({ "riskScore": score, "capRate": cap_rate, "ratio": ratio, "verdict": verdict }))
    }
}
