use crate::llm::TextGenerator;
use crate::models::{Recommendation, ScoredProfile};
use crate::storage::{TabularStore, append_records};
use anyhow::{Context, Result};
use chrono::NaiveDate;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, info, warn};

/// Ranks scored profiles, picks the top-k and appends them to the
/// recommendation log. The log is append-only.
pub struct RecommendationSelector<'a> {
    store: &'a dyn TabularStore,
    sheet: &'a str,
    generator: Option<&'a dyn TextGenerator>,
    narrative_delay: Duration,
}

impl<'a> RecommendationSelector<'a> {
    pub fn new(store: &'a dyn TabularStore, sheet: &'a str) -> Self {
        Self {
            store,
            sheet,
            generator: None,
            narrative_delay: Duration::ZERO,
        }
    }

    /// Annotate each pick with a short narrative, pausing `delay` between calls.
    pub fn with_narrative(mut self, generator: &'a dyn TextGenerator, delay: Duration) -> Self {
        self.generator = Some(generator);
        self.narrative_delay = delay;
        self
    }

    pub async fn select(&self, scored: Vec<ScoredProfile>, k: usize, today: NaiveDate) -> Result<Vec<Recommendation>> {
        let picks = rank(scored, k);
        if picks.is_empty() {
            warn!("Recommendation: nothing to rank");
            return Ok(vec![]);
        }

        let mut recommendations: Vec<Recommendation> = picks
            .iter()
            .map(|s| {
                debug!("{} {}: {:?}", s.profile.code, s.profile.name, s.breakdown);
                Recommendation {
                    date: today,
                    code: s.profile.code.clone(),
                    name: s.profile.name.clone(),
                    score: s.score(),
                    close: s.profile.last_close,
                    high52: s.profile.high52,
                    low52: s.profile.low52,
                    volume: s.profile.last_volume,
                    narrative: None,
                }
            })
            .collect();

        if let Some(generator) = self.generator {
            self.enrich(generator, &mut recommendations).await;
        }

        append_records(self.store, self.sheet, &recommendations)
            .with_context(|| format!("Failed to append to recommendation log {}", self.sheet))?;

        for r in &recommendations {
            info!("Pick {} {} score {:.2} close {}", r.code, r.name, r.score, r.close);
        }
        Ok(recommendations)
    }

    /// Failures never propagate: the pick keeps a visible placeholder instead.
    async fn enrich(&self, generator: &dyn TextGenerator, recommendations: &mut [Recommendation]) {
        for (i, rec) in recommendations.iter_mut().enumerate() {
            if i > 0 && !self.narrative_delay.is_zero() {
                sleep(self.narrative_delay).await;
            }

            let text = match generator.generate(&narrative_prompt(rec)).await {
                Ok(text) => text,
                Err(e) => {
                    warn!("{}: narrative generation failed: {:#}", rec.code, e);
                    format!("[narrative unavailable: {}]", e)
                }
            };
            rec.narrative = Some(text);
        }
    }
}

/// Sort by score, highest first, ties by code ascending; keep `k`.
pub fn rank(mut scored: Vec<ScoredProfile>, k: usize) -> Vec<ScoredProfile> {
    scored.sort_by(|a, b| {
        b.score()
            .total_cmp(&a.score())
            .then_with(|| a.profile.code.cmp(&b.profile.code))
    });
    scored.truncate(k);
    scored
}

pub fn narrative_prompt(rec: &Recommendation) -> String {
    format!(
        "You are an equity analyst writing for retail investors in Korea.\n\
         In two or three sentences of Korean, explain why {name} ({code}) may be worth watching.\n\
         Data: current price {close}, 52-week high {high}, 52-week low {low}, \
         latest volume {volume}, screening score {score:.1}/100.\n\
         Mention the position within the 52-week range. No greetings, no markdown.",
        name = rec.name,
        code = rec.code,
        close = rec.close,
        high = rec.high52,
        low = rec.low52,
        volume = rec.volume,
        score = rec.score,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ScoreBreakdown, SymbolProfile};
    use crate::storage::SheetRecord;
    use crate::storage::memory::MemoryStore;
    use crate::storage::read_records;
    use async_trait::async_trait;
    use std::sync::Mutex;

    fn scored(code: &str, total: f64) -> ScoredProfile {
        ScoredProfile {
            profile: SymbolProfile {
                code: code.to_string(),
                name: format!("name-{}", code),
                high52: 200.0,
                low52: 100.0,
                last_close: 120.0,
                last_market_cap: 1e12,
                last_volume: 300_000,
                last_date: today(),
            },
            breakdown: ScoreBreakdown {
                total,
                ..ScoreBreakdown::default()
            },
        }
    }

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 6, 5).unwrap()
    }

    struct FakeGenerator {
        fail_on: Option<String>,
        prompts: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl TextGenerator for FakeGenerator {
        async fn generate(&self, prompt: &str) -> Result<String> {
            self.prompts.lock().unwrap().push(prompt.to_string());
            if let Some(code) = &self.fail_on {
                if prompt.contains(code.as_str()) {
                    anyhow::bail!("quota exceeded");
                }
            }
            Ok("Trading near its 52-week low.".to_string())
        }
    }

    #[test]
    fn rank_orders_and_truncates() {
        let input = vec![scored("000003", 40.0), scored("000001", 70.0), scored("000002", 55.0)];
        let top = rank(input.clone(), 2);
        assert_eq!(top.len(), 2);
        assert_eq!(top[0].profile.code, "000001");
        assert_eq!(top[1].profile.code, "000002");

        assert_eq!(rank(input, 10).len(), 3);
    }

    #[test]
    fn ties_break_by_code() {
        let input = vec![scored("000009", 50.0), scored("000004", 50.0), scored("000007", 50.0)];
        let codes: Vec<String> = rank(input, 3).into_iter().map(|s| s.profile.code).collect();
        assert_eq!(codes, vec!["000004", "000007", "000009"]);
    }

    #[tokio::test]
    async fn log_is_append_only_with_single_header() {
        let store = MemoryStore::default();
        let selector = RecommendationSelector::new(&store, "recommendations");

        let first = selector
            .select(vec![scored("000001", 60.0), scored("000002", 30.0)], 5, today())
            .await
            .unwrap();
        assert_eq!(first.len(), 2);
        assert!(first.iter().all(|r| r.narrative.is_none() && r.date == today()));

        selector.select(vec![scored("000003", 80.0)], 5, today()).await.unwrap();

        let header = store.header("recommendations").unwrap().unwrap();
        assert_eq!(header, Recommendation::HEADER.iter().map(|s| s.to_string()).collect::<Vec<_>>());

        let log: Vec<Recommendation> = read_records(&store, "recommendations").unwrap();
        let codes: Vec<&str> = log.iter().map(|r| r.code.as_str()).collect();
        assert_eq!(codes, vec!["000001", "000002", "000003"]);
    }

    #[tokio::test]
    async fn empty_input_writes_nothing() {
        let store = MemoryStore::default();
        let selector = RecommendationSelector::new(&store, "recommendations");
        assert!(selector.select(vec![], 5, today()).await.unwrap().is_empty());
        assert_eq!(store.write_calls(), 0);
    }

    #[tokio::test]
    async fn narrative_failure_leaves_placeholder() {
        let store = MemoryStore::default();
        let generator = FakeGenerator {
            fail_on: Some("000002".into()),
            prompts: Mutex::new(vec![]),
        };
        let selector = RecommendationSelector::new(&store, "recommendations")
            .with_narrative(&generator, Duration::from_millis(1));

        let picks = selector
            .select(vec![scored("000001", 60.0), scored("000002", 50.0)], 5, today())
            .await
            .unwrap();

        assert_eq!(picks[0].narrative.as_deref(), Some("Trading near its 52-week low."));
        let placeholder = picks[1].narrative.as_deref().unwrap();
        assert!(placeholder.starts_with("[narrative unavailable"));
        assert!(placeholder.contains("quota exceeded"));

        let prompts = generator.prompts.lock().unwrap();
        assert_eq!(prompts.len(), 2);
        assert!(prompts[0].contains("52-week high 200"));
        assert!(prompts[0].contains("score 60.0/100"));

        let log: Vec<Recommendation> = read_records(&store, "recommendations").unwrap();
        assert_eq!(log.len(), 2);
    }
}
