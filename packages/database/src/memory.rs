//! In-process [`Storage`] backend.
//!
//! All state lives behind one `RwLock`, so a [`WriteBatch`] is applied
//! under a single write guard and is never observed half-written.

use std::collections::BTreeMap;

use async_trait::async_trait;
use skyguard_database_models::{
    LinkCodeRow, NewReport, NewShelter, ProfileFilter, ReportFilter, ReportRow, ShelterRow,
    UserProfileRow, WriteBatch,
};
use tokio::sync::RwLock;

use crate::{DbError, Storage};

#[derive(Debug, Default)]
struct MemoryState {
    next_report_id: i64,
    reports: BTreeMap<i64, ReportRow>,
    profiles: BTreeMap<i64, UserProfileRow>,
    link_codes: BTreeMap<String, LinkCodeRow>,
    next_shelter_id: i64,
    shelters: BTreeMap<i64, ShelterRow>,
}

/// Storage kept entirely in memory.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: RwLock<MemoryState>,
}

impl MemoryStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Storage for MemoryStore {
    async fn create_report(&self, report: NewReport) -> Result<ReportRow, DbError> {
        let mut state = self.state.write().await;
        state.next_report_id += 1;
        let row = report.into_row(state.next_report_id);
        state.reports.insert(row.id, row.clone());
        drop(state);
        Ok(row)
    }

    async fn get_report(&self, id: i64) -> Result<Option<ReportRow>, DbError> {
        Ok(self.state.read().await.reports.get(&id).cloned())
    }

    async fn query_reports(&self, filter: &ReportFilter) -> Result<Vec<ReportRow>, DbError> {
        Ok(self
            .state
            .read()
            .await
            .reports
            .values()
            .filter(|r| filter.matches(r))
            .cloned()
            .collect())
    }

    async fn count_reports(&self, filter: &ReportFilter) -> Result<u64, DbError> {
        let count = self
            .state
            .read()
            .await
            .reports
            .values()
            .filter(|r| filter.matches(r))
            .count();
        Ok(count as u64)
    }

    async fn delete_report(&self, id: i64) -> Result<u64, DbError> {
        let mut state = self.state.write().await;
        let before = state.reports.len();
        state
            .reports
            .retain(|&rid, r| rid != id && r.parent_id != Some(id));
        let deleted = before - state.reports.len();
        drop(state);
        Ok(deleted as u64)
    }

    async fn get_profile(&self, user_id: i64) -> Result<Option<UserProfileRow>, DbError> {
        Ok(self.state.read().await.profiles.get(&user_id).cloned())
    }

    async fn query_profiles(
        &self,
        filter: &ProfileFilter,
    ) -> Result<Vec<UserProfileRow>, DbError> {
        Ok(self
            .state
            .read()
            .await
            .profiles
            .values()
            .filter(|p| filter.matches(p))
            .cloned()
            .collect())
    }

    async fn replace_link_code(&self, code: &LinkCodeRow) -> Result<(), DbError> {
        let mut state = self.state.write().await;
        state.link_codes.retain(|_, c| c.user_id != code.user_id);
        state.link_codes.insert(code.code.clone(), code.clone());
        drop(state);
        Ok(())
    }

    async fn get_link_code(&self, code: &str) -> Result<Option<LinkCodeRow>, DbError> {
        Ok(self.state.read().await.link_codes.get(code).cloned())
    }

    async fn list_shelters(&self) -> Result<Vec<ShelterRow>, DbError> {
        Ok(self.state.read().await.shelters.values().cloned().collect())
    }

    async fn create_shelter(&self, shelter: NewShelter) -> Result<ShelterRow, DbError> {
        let mut state = self.state.write().await;
        state.next_shelter_id += 1;
        let row = ShelterRow {
            id: state.next_shelter_id,
            title: shelter.title,
            address: shelter.address,
            capacity: shelter.capacity,
            latitude: shelter.latitude,
            longitude: shelter.longitude,
        };
        state.shelters.insert(row.id, row.clone());
        drop(state);
        Ok(row)
    }

    async fn commit(&self, batch: WriteBatch) -> Result<(), DbError> {
        let mut state = self.state.write().await;

        if let Some(missing) = batch
            .reports
            .iter()
            .find(|r| !state.reports.contains_key(&r.id))
        {
            return Err(DbError::Conversion {
                message: format!("Cannot update unknown report {}", missing.id),
            });
        }

        for report in batch.reports {
            state.reports.insert(report.id, report);
        }
        for profile in batch.profiles {
            state.profiles.insert(profile.user_id, profile);
        }
        for update in &batch.profile_updates {
            state
                .profiles
                .entry(update.user_id)
                .or_insert_with(|| UserProfileRow::new(update.user_id))
                .apply(&update.change);
        }
        for code in batch.link_codes {
            state.link_codes.insert(code.code.clone(), code);
        }
        drop(state);

        Ok(())
    }
}
