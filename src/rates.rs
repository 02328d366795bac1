//! Advisory rate input. Rates and bonuses arrive from outside the core
//! (scraped pages, user edits) and are merged into the store with
//! last-write-wins semantics. Nothing here is authoritative: parse failures
//! fall back to zero and the engine never waits on any of it.

use anyhow::Result;

use crate::store::{self, store::StateStore};

/// One best-effort `{project -> rate/bonus}` observation.
#[derive(Debug, Clone, PartialEq)]
pub struct RateUpdate {
    pub project_name: String,
    pub rate: Option<f64>,
    pub bonus: Option<f64>,
}

/// Merges updates additively into the stored rate tables. Existing entries
/// for other projects are preserved; negative observations are ignored.
pub async fn apply_rate_updates(
    store: &impl StateStore,
    updates: impl IntoIterator<Item = RateUpdate>,
) -> Result<()> {
    let mut rates = store::hourly_rates(store).await?;
    let mut bonuses = store::bonus_rates(store).await?;
    let mut rates_changed = false;
    let mut bonuses_changed = false;

    for update in updates {
        if let Some(rate) = update.rate.filter(|r| *r >= 0.) {
            rates.insert(update.project_name.clone(), rate);
            rates_changed = true;
        }
        if let Some(bonus) = update.bonus.filter(|b| *b >= 0.) {
            bonuses.insert(update.project_name.clone(), bonus);
            bonuses_changed = true;
        }
    }

    if rates_changed {
        store::write(store, store::StoreKey::HourlyRates, &rates).await?;
    }
    if bonuses_changed {
        store::write(store, store::StoreKey::BonusRates, &bonuses).await?;
    }
    Ok(())
}

/// Parses free-form rate text such as "$22.50/hr" or "22.5". Anything that
/// doesn't contain a usable non-negative number yields zero.
pub fn parse_rate(text: &str) -> f64 {
    let cleaned: String = text
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '.')
        .collect();
    cleaned.parse::<f64>().ok().filter(|v| *v >= 0.).unwrap_or(0.)
}

/// Splits a scraped page title into a clean project name and an optional
/// priority bonus, e.g. "Labeling [PRIORITY +$5.00]" -> ("Labeling", Some(5.0)).
pub fn parse_project_title(raw: &str) -> (String, Option<f64>) {
    let trimmed = raw.trim();
    let Some(open) = trimmed.to_ascii_uppercase().find("[PRIORITY") else {
        return (trimmed.to_string(), None);
    };
    let Some(close) = trimmed[open..].find(']') else {
        return (trimmed.to_string(), None);
    };

    let tag = &trimmed[open + 1..open + close];
    let bonus = tag
        .find('$')
        .map(|dollar| parse_rate(&tag[dollar..]))
        .filter(|v| *v > 0.);

    let mut name = String::new();
    name.push_str(trimmed[..open].trim_end());
    let rest = trimmed[open + close + 1..].trim_start();
    if !rest.is_empty() {
        if !name.is_empty() {
            name.push(' ');
        }
        name.push_str(rest);
    }
    (name.trim().to_string(), bonus)
}

#[cfg(test)]
mod tests {
    use anyhow::Result;

    use crate::store::{self, store::MemoryStore};

    use super::{apply_rate_updates, parse_project_title, parse_rate, RateUpdate};

    #[test]
    fn rate_text_parses_forgivingly() {
        assert_eq!(parse_rate("$22.50/hr"), 22.5);
        assert_eq!(parse_rate("18"), 18.);
        assert_eq!(parse_rate("rate unknown"), 0.);
        assert_eq!(parse_rate(""), 0.);
    }

    #[test]
    fn priority_bonus_is_extracted_from_titles() {
        assert_eq!(
            parse_project_title("Labeling [PRIORITY +$5.00]"),
            ("Labeling".to_string(), Some(5.)),
        );
        assert_eq!(
            parse_project_title("Plain Project"),
            ("Plain Project".to_string(), None),
        );
        assert_eq!(
            parse_project_title("[PRIORITY +$2] Review Pass"),
            ("Review Pass".to_string(), Some(2.)),
        );
    }

    #[tokio::test]
    async fn updates_merge_additively() -> Result<()> {
        let store = MemoryStore::new();
        apply_rate_updates(
            &store,
            [RateUpdate {
                project_name: "Labeling".into(),
                rate: Some(15.),
                bonus: Some(5.),
            }],
        )
        .await?;
        apply_rate_updates(
            &store,
            [RateUpdate {
                project_name: "Review".into(),
                rate: Some(20.),
                bonus: None,
            }],
        )
        .await?;

        let rates = store::hourly_rates(&store).await?;
        assert_eq!(rates["Labeling"], 15.);
        assert_eq!(rates["Review"], 20.);
        let bonuses = store::bonus_rates(&store).await?;
        assert_eq!(bonuses["Labeling"], 5.);
        assert!(!bonuses.contains_key("Review"));
        Ok(())
    }

    #[tokio::test]
    async fn negative_observations_are_dropped() -> Result<()> {
        let store = MemoryStore::new();
        apply_rate_updates(
            &store,
            [RateUpdate {
                project_name: "Labeling".into(),
                rate: Some(-3.),
                bonus: None,
            }],
        )
        .await?;
        assert!(store::hourly_rates(&store).await?.is_empty());
        Ok(())
    }
}
