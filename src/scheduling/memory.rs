use std::collections::HashMap;

use axum::async_trait;
use sqlx::types::Decimal;
use time::OffsetDateTime;
use tokio::sync::Mutex;

use crate::catalog::repo::{Branch, Category, Master, Service};

use super::error::Error;
use super::store::{
    overlaps, AppointmentFilter, AppointmentStore, AppointmentView, CatalogReader, NewAppointment,
};

#[derive(Debug, Clone)]
struct StoredAppointment {
    id: i64,
    new: NewAppointment,
}

#[derive(Default)]
struct Inner {
    services: HashMap<i64, Service>,
    masters: HashMap<i64, Master>,
    branches: HashMap<i64, Branch>,
    categories: HashMap<i64, Category>,
    appointments: Vec<StoredAppointment>,
    next_id: i64,
}

/// In-memory store backing tests and `AppState::fake()`. A single mutex
/// guards all state, so the conflict check and the insert in
/// `insert_if_free` are one atomic step, same as the Postgres store under
/// its advisory lock.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn put_service(&self, service: Service) {
        self.inner.lock().await.services.insert(service.id, service);
    }

    pub async fn put_master(&self, master: Master) {
        self.inner.lock().await.masters.insert(master.id, master);
    }

    pub async fn put_branch(&self, branch: Branch) {
        self.inner.lock().await.branches.insert(branch.id, branch);
    }

    pub async fn put_category(&self, category: Category) {
        self.inner.lock().await.categories.insert(category.id, category);
    }

    /// Later catalog edits must not touch existing bookings; tests use this
    /// to verify the price snapshot.
    pub async fn set_service_price(&self, id: i64, price: Decimal) {
        if let Some(s) = self.inner.lock().await.services.get_mut(&id) {
            s.price = price;
        }
    }

    pub async fn get_service_snapshot(&self, id: i64) -> Option<Service> {
        self.inner.lock().await.services.get(&id).cloned()
    }

    /// Same cascade as `Category::delete_detaching` in Postgres: dependent
    /// services survive with their category reference cleared, the category
    /// itself goes away. Returns false when the category does not exist.
    pub async fn delete_category_detaching(&self, id: i64) -> bool {
        let mut inner = self.inner.lock().await;
        if inner.categories.remove(&id).is_none() {
            return false;
        }
        for s in inner.services.values_mut() {
            if s.category_id == Some(id) {
                s.category_id = None;
            }
        }
        true
    }
}

impl Inner {
    fn view(&self, stored: &StoredAppointment) -> Result<AppointmentView, Error> {
        let service = self
            .services
            .get(&stored.new.service_id)
            .cloned()
            .ok_or_else(|| Error::not_found("service not found"))?;
        let master = self
            .masters
            .get(&stored.new.master_id)
            .cloned()
            .ok_or_else(|| Error::not_found("master not found"))?;
        let branch = stored
            .new
            .branch_id
            .and_then(|id| self.branches.get(&id).cloned());
        Ok(AppointmentView {
            id: stored.id,
            customer_name: stored.new.customer_name.clone(),
            customer_phone: stored.new.customer_phone.clone(),
            starts_at: stored.new.starts_at,
            ends_at: stored.new.ends_at,
            price_at_booking: stored.new.price_at_booking,
            service,
            master,
            branch,
        })
    }

    fn conflicts(&self, master_id: i64, starts_at: OffsetDateTime, ends_at: OffsetDateTime) -> bool {
        self.appointments.iter().any(|a| {
            a.new.master_id == master_id
                && overlaps(starts_at, ends_at, a.new.starts_at, a.new.ends_at)
        })
    }
}

#[async_trait]
impl AppointmentStore for MemoryStore {
    async fn has_conflict(
        &self,
        master_id: i64,
        starts_at: OffsetDateTime,
        ends_at: OffsetDateTime,
    ) -> Result<bool, Error> {
        Ok(self.inner.lock().await.conflicts(master_id, starts_at, ends_at))
    }

    async fn insert_if_free(&self, new: NewAppointment) -> Result<AppointmentView, Error> {
        let mut inner = self.inner.lock().await;
        if inner.conflicts(new.master_id, new.starts_at, new.ends_at) {
            return Err(Error::conflict("master already booked"));
        }
        inner.next_id += 1;
        let stored = StoredAppointment {
            id: inner.next_id,
            new,
        };
        let view = inner.view(&stored)?;
        inner.appointments.push(stored);
        Ok(view)
    }

    async fn list(&self, filter: AppointmentFilter) -> Result<Vec<AppointmentView>, Error> {
        let inner = self.inner.lock().await;
        let mut views = Vec::new();
        for a in &inner.appointments {
            if let Some(mid) = filter.master_id {
                if a.new.master_id != mid {
                    continue;
                }
            }
            // start-time filter, inclusive on both bounds
            if let Some(from) = filter.from {
                if a.new.starts_at < from {
                    continue;
                }
            }
            if let Some(to) = filter.to {
                if a.new.starts_at > to {
                    continue;
                }
            }
            views.push(inner.view(a)?);
        }
        views.sort_by_key(|v| v.starts_at);
        Ok(views)
    }

    async fn delete(&self, id: i64) -> Result<(), Error> {
        let mut inner = self.inner.lock().await;
        let before = inner.appointments.len();
        inner.appointments.retain(|a| a.id != id);
        if inner.appointments.len() == before {
            return Err(Error::not_found("appointment not found"));
        }
        Ok(())
    }
}

#[async_trait]
impl CatalogReader for MemoryStore {
    async fn get_service(&self, id: i64) -> Result<Option<Service>, Error> {
        Ok(self.inner.lock().await.services.get(&id).cloned())
    }

    async fn get_master(&self, id: i64) -> Result<Option<Master>, Error> {
        Ok(self.inner.lock().await.masters.get(&id).cloned())
    }

    async fn get_branch(&self, id: i64) -> Result<Option<Branch>, Error> {
        Ok(self.inner.lock().await.branches.get(&id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use time::macros::datetime;

    use super::*;

    fn booking(master_id: i64, starts_at: OffsetDateTime, ends_at: OffsetDateTime) -> NewAppointment {
        NewAppointment {
            customer_name: "Anna".into(),
            customer_phone: None,
            starts_at,
            ends_at,
            price_at_booking: Decimal::new(1000, 0),
            service_id: 1,
            master_id,
            branch_id: None,
        }
    }

    fn service(id: i64, category_id: Option<i64>) -> Service {
        Service {
            id,
            name: format!("Service {}", id),
            duration_minutes: 30,
            price: Decimal::new(1000, 0),
            category_id,
        }
    }

    async fn store_with_booking() -> MemoryStore {
        let store = MemoryStore::new();
        store.put_service(service(1, None)).await;
        store
            .put_master(Master {
                id: 1,
                name: "Alla".into(),
                active: true,
                role: "MASTER".into(),
                avatar_key: None,
            })
            .await;
        store
            .insert_if_free(booking(
                1,
                datetime!(2024-01-01 10:00 UTC),
                datetime!(2024-01-01 10:30 UTC),
            ))
            .await
            .unwrap();
        store
    }

    #[tokio::test]
    async fn detector_flags_overlap_and_containment() {
        let store = store_with_booking().await;
        // partial overlap
        assert!(store
            .has_conflict(1, datetime!(2024-01-01 10:15 UTC), datetime!(2024-01-01 10:45 UTC))
            .await
            .unwrap());
        // proposed interval contains the existing booking
        assert!(store
            .has_conflict(1, datetime!(2024-01-01 09:00 UTC), datetime!(2024-01-01 12:00 UTC))
            .await
            .unwrap());
        // proposed interval inside the existing booking
        assert!(store
            .has_conflict(1, datetime!(2024-01-01 10:10 UTC), datetime!(2024-01-01 10:20 UTC))
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn detector_ignores_adjacent_and_other_masters() {
        let store = store_with_booking().await;
        // back-to-back on either side
        assert!(!store
            .has_conflict(1, datetime!(2024-01-01 10:30 UTC), datetime!(2024-01-01 11:00 UTC))
            .await
            .unwrap());
        assert!(!store
            .has_conflict(1, datetime!(2024-01-01 09:30 UTC), datetime!(2024-01-01 10:00 UTC))
            .await
            .unwrap());
        // same slot, different master
        assert!(!store
            .has_conflict(2, datetime!(2024-01-01 10:00 UTC), datetime!(2024-01-01 10:30 UTC))
            .await
            .unwrap());
        // zero-duration probe at the boundary
        assert!(!store
            .has_conflict(1, datetime!(2024-01-01 10:30 UTC), datetime!(2024-01-01 10:30 UTC))
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn category_delete_detaches_services_without_deleting_them() {
        let store = MemoryStore::new();
        store.put_category(Category { id: 1, name: "Hair".into() }).await;
        store.put_service(service(1, Some(1))).await;
        store.put_service(service(2, Some(1))).await;
        store.put_service(service(3, Some(1))).await;
        store.put_service(service(4, None)).await;

        assert!(store.delete_category_detaching(1).await);

        for id in 1..=3 {
            let s = store.get_service_snapshot(id).await.expect("service survives");
            assert_eq!(s.category_id, None);
        }
        // untouched service stays as it was
        assert_eq!(store.get_service_snapshot(4).await.unwrap().category_id, None);

        // category itself is gone
        assert!(!store.delete_category_detaching(1).await);
    }
}
