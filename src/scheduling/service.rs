use time::format_description::well_known::Rfc3339;
use time::{Duration, OffsetDateTime};

use super::dto::{CreateAppointment, ListQuery};
use super::error::Error;
use super::store::{
    AppointmentFilter, AppointmentStore, AppointmentView, CatalogReader, NewAppointment,
};

fn parse_timestamp(value: &str) -> Option<OffsetDateTime> {
    OffsetDateTime::parse(value, &Rfc3339).ok()
}

/// Book an appointment.
///
/// Validation is fail-fast in a fixed order: required fields, date parse,
/// service resolution, then master/branch resolution. The end time is
/// `starts_at + service.duration_minutes` and the service price is
/// snapshotted into `price_at_booking` at this instant; later catalog edits
/// never touch the booking. The conflict check happens inside
/// `insert_if_free`, atomically with the write.
pub async fn book(
    appointments: &dyn AppointmentStore,
    catalog: &dyn CatalogReader,
    req: CreateAppointment,
) -> Result<AppointmentView, Error> {
    let customer_name = req
        .customer_name
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty());
    let (Some(customer_name), Some(starts_at_raw), Some(service_id), Some(master_id)) = (
        customer_name,
        req.starts_at.as_deref(),
        req.service_id,
        req.master_id,
    ) else {
        return Err(Error::validation("missing required field"));
    };

    let starts_at = parse_timestamp(starts_at_raw).ok_or_else(|| Error::validation("invalid date"))?;

    let service = catalog
        .get_service(service_id)
        .await?
        .ok_or_else(|| Error::validation("service not found"))?;
    let ends_at = starts_at + Duration::minutes(i64::from(service.duration_minutes));

    if catalog.get_master(master_id).await?.is_none() {
        return Err(Error::validation("master not found"));
    }
    if let Some(branch_id) = req.branch_id {
        if catalog.get_branch(branch_id).await?.is_none() {
            return Err(Error::validation("branch not found"));
        }
    }

    appointments
        .insert_if_free(NewAppointment {
            customer_name: customer_name.to_string(),
            customer_phone: req.customer_phone,
            starts_at,
            ends_at,
            price_at_booking: service.price,
            service_id,
            master_id,
            branch_id: req.branch_id,
        })
        .await
}

/// Calendar query: appointments ordered by start time, filtered by an
/// inclusive start-time window and optionally by master. This is a
/// start-time filter, not an interval overlap filter; a booking already
/// running at `from` but started earlier is not returned.
pub async fn list(
    appointments: &dyn AppointmentStore,
    q: ListQuery,
) -> Result<Vec<AppointmentView>, Error> {
    let from = match q.from.as_deref() {
        Some(v) => Some(parse_timestamp(v).ok_or_else(|| Error::validation("invalid date"))?),
        None => None,
    };
    let to = match q.to.as_deref() {
        Some(v) => Some(parse_timestamp(v).ok_or_else(|| Error::validation("invalid date"))?),
        None => None,
    };
    appointments
        .list(AppointmentFilter {
            from,
            to,
            master_id: q.master_id,
        })
        .await
}

/// Cancel a booking. Hard delete; cancelling an unknown id is a not-found
/// error. There is deliberately no reschedule operation.
pub async fn cancel(appointments: &dyn AppointmentStore, id: i64) -> Result<(), Error> {
    appointments.delete(id).await
}
