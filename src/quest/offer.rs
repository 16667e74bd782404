//! Pending Offers
//!
//! An offer is a question put to the player. It lives only in memory until
//! it is accepted, declined or swept after its TTL.

use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingOffer {
    pub id: Uuid,
    pub player_id: String,
    pub quest_id: String,
    pub text: Option<String>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl PendingOffer {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// Outstanding offers by id
pub struct OfferBook {
    offers: DashMap<Uuid, PendingOffer>,
    ttl: chrono::Duration,
}

impl OfferBook {
    pub fn new(ttl: Duration) -> Self {
        Self {
            offers: DashMap::new(),
            ttl: chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::MAX),
        }
    }

    pub fn create(
        &self,
        player_id: &str,
        quest_id: &str,
        text: Option<String>,
        now: DateTime<Utc>,
    ) -> PendingOffer {
        let offer = PendingOffer {
            id: Uuid::new_v4(),
            player_id: player_id.to_string(),
            quest_id: quest_id.to_string(),
            text,
            created_at: now,
            expires_at: now.checked_add_signed(self.ttl).unwrap_or(DateTime::<Utc>::MAX_UTC),
        };
        self.offers.insert(offer.id, offer.clone());
        offer
    }

    /// Remove and return the offer if it is still valid.
    /// An expired offer is removed as well.
    pub fn take(&self, id: Uuid, now: DateTime<Utc>) -> Option<PendingOffer> {
        let (_, offer) = self.offers.remove(&id)?;
        if offer.is_expired(now) {
            return None;
        }
        Some(offer)
    }

    /// Remove every expired offer, oldest first
    pub fn sweep(&self, now: DateTime<Utc>) -> Vec<PendingOffer> {
        let expired: Vec<Uuid> = self
            .offers
            .iter()
            .filter(|o| o.is_expired(now))
            .map(|o| o.id)
            .collect();
        let mut removed: Vec<PendingOffer> = expired
            .into_iter()
            .filter_map(|id| self.offers.remove(&id).map(|(_, o)| o))
            .collect();
        removed.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        removed
    }

    pub fn pending_for(&self, player_id: &str) -> Vec<PendingOffer> {
        let mut offers: Vec<PendingOffer> = self
            .offers
            .iter()
            .filter(|o| o.player_id == player_id)
            .map(|o| o.value().clone())
            .collect();
        offers.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        offers
    }

    pub fn len(&self) -> usize {
        self.offers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.offers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_take_once() {
        let book = OfferBook::new(Duration::from_secs(60));
        let now = Utc::now();
        let offer = book.create("p1", "q", None, now);

        assert_eq!(book.take(offer.id, now).map(|o| o.quest_id), Some("q".to_string()));
        assert!(book.take(offer.id, now).is_none());
    }

    #[test]
    fn test_expiry_and_sweep() {
        let book = OfferBook::new(Duration::from_secs(10));
        let now = Utc::now();
        let old = book.create("p1", "a", None, now);
        let fresh = book.create("p1", "b", None, now + chrono::Duration::seconds(8));

        let later = now + chrono::Duration::seconds(12);
        let swept = book.sweep(later);
        assert_eq!(swept.len(), 1);
        assert_eq!(swept[0].id, old.id);
        assert_eq!(book.pending_for("p1").len(), 1);

        assert!(book.take(fresh.id, now + chrono::Duration::seconds(30)).is_none());
        assert!(book.is_empty());
    }
}
