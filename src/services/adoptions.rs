use crate::{
    db::{bounded, DbPool},
    entities::{
        adoption_request::{self, RequestStatus},
        pet::{self, PetStatus},
        surrender_request,
    },
    errors::ServiceError,
    events::{publish, Event, EventSender},
    services::inventory::{admit_pet, transition_pet, LedgerEffects, NewPet, PetChange},
};
use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter, QueryOrder, Set,
    TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, instrument, warn};
use validator::Validate;

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct NewSurrender {
    pub customer_id: i32,
    #[validate(length(min = 1, max = 100))]
    pub pet_name: String,
    #[validate(length(min = 1, max = 50))]
    pub species: String,
    pub breed: Option<String>,
    #[validate(range(min = 0, max = 600))]
    pub age_months: Option<i32>,
    pub gender: Option<String>,
    #[validate(length(max = 1000))]
    pub reason: Option<String>,
}

/// Only Pending requests can be reviewed or withdrawn.
fn ensure_pending(
    entity: &'static str,
    current: RequestStatus,
    target: RequestStatus,
) -> Result<(), ServiceError> {
    if current == RequestStatus::Pending && target != RequestStatus::Pending {
        Ok(())
    } else {
        Err(ServiceError::invalid_transition(entity, current, target))
    }
}

/// Adoption and surrender workflows.
///
/// Pet status changes go through the inventory ledger in the same
/// transaction as the request update.
#[derive(Clone)]
pub struct AdoptionService {
    db_pool: Arc<DbPool>,
    event_sender: Option<Arc<EventSender>>,
    timeout: Duration,
}

impl AdoptionService {
    pub fn new(
        db_pool: Arc<DbPool>,
        event_sender: Option<Arc<EventSender>>,
        timeout: Duration,
    ) -> Self {
        Self {
            db_pool,
            event_sender,
            timeout,
        }
    }

    /// Files an adoption request and reserves the pet.
    #[instrument(skip(self, notes))]
    pub async fn submit_adoption(
        &self,
        customer_id: i32,
        pet_id: i32,
        notes: Option<String>,
    ) -> Result<adoption_request::Model, ServiceError> {
        let db = &*self.db_pool;

        let (request, change) = bounded(self.timeout, "adoptions.submit", async {
            let txn = db.begin().await?;
            let change =
                transition_pet(&txn, pet_id, &[PetStatus::Available], PetStatus::Reserved).await?;

            let now = Utc::now();
            let request = adoption_request::ActiveModel {
                customer_id: Set(customer_id),
                pet_id: Set(pet_id),
                status: Set(RequestStatus::Pending),
                notes: Set(notes),
                reviewed_by: Set(None),
                created_at: Set(now),
                updated_at: Set(Some(now)),
                ..Default::default()
            }
            .insert(&txn)
            .await?;

            txn.commit().await?;
            Ok::<_, ServiceError>((request, change))
        })
        .await?;

        info!(request_id = request.id, pet_id, "Adoption requested");
        let mut events = vec![Event::AdoptionRequested {
            request_id: request.id,
            pet_id,
        }];
        events.extend(pet_events(Some(change)));
        publish(&self.event_sender, events);

        Ok(request)
    }

    /// Approves the request; the reserved pet becomes Adopted.
    #[instrument(skip(self))]
    pub async fn approve_adoption(
        &self,
        request_id: i32,
        staff_id: i32,
    ) -> Result<adoption_request::Model, ServiceError> {
        self.review_adoption(request_id, RequestStatus::Approved, Some(staff_id), None)
            .await
    }

    /// Rejects the request and puts the pet back on offer.
    #[instrument(skip(self))]
    pub async fn reject_adoption(
        &self,
        request_id: i32,
        staff_id: i32,
    ) -> Result<adoption_request::Model, ServiceError> {
        self.review_adoption(request_id, RequestStatus::Rejected, Some(staff_id), None)
            .await
    }

    /// Customer withdraws their own pending request.
    #[instrument(skip(self))]
    pub async fn cancel_adoption(
        &self,
        request_id: i32,
        customer_id: i32,
    ) -> Result<adoption_request::Model, ServiceError> {
        self.review_adoption(request_id, RequestStatus::Cancelled, None, Some(customer_id))
            .await
    }

    async fn review_adoption(
        &self,
        request_id: i32,
        target: RequestStatus,
        staff_id: Option<i32>,
        customer_id: Option<i32>,
    ) -> Result<adoption_request::Model, ServiceError> {
        let db = &*self.db_pool;

        let (request, change) = bounded(self.timeout, "adoptions.review", async {
            let txn = db.begin().await?;
            let current = adoption_request::Entity::find_by_id(request_id)
                .one(&txn)
                .await?
                .ok_or_else(|| ServiceError::NotFound(format!("adoption request {}", request_id)))?;

            if let Some(customer_id) = customer_id {
                if current.customer_id != customer_id {
                    return Err(ServiceError::Forbidden(format!(
                        "adoption request {} belongs to another customer",
                        request_id
                    )));
                }
            }
            ensure_pending("adoption request", current.status, target)?;

            let change = if target == RequestStatus::Approved {
                Some(
                    transition_pet(&txn, current.pet_id, &[PetStatus::Reserved], PetStatus::Adopted)
                        .await?,
                )
            } else {
                release_pet(&txn, current.pet_id).await?
            };

            let mut active: adoption_request::ActiveModel = current.into();
            active.status = Set(target);
            if staff_id.is_some() {
                active.reviewed_by = Set(staff_id);
            }
            active.updated_at = Set(Some(Utc::now()));
            let request = active.update(&txn).await?;

            txn.commit().await?;
            Ok::<_, ServiceError>((request, change))
        })
        .await?;

        info!(request_id, status = %target, "Adoption request reviewed");
        let mut events = vec![Event::AdoptionReviewed {
            request_id,
            status: target,
        }];
        events.extend(pet_events(change));
        publish(&self.event_sender, events);

        Ok(request)
    }

    pub async fn pending_adoptions(&self) -> Result<Vec<adoption_request::Model>, ServiceError> {
        let db = &*self.db_pool;
        bounded(self.timeout, "adoptions.pending", async {
            let rows = adoption_request::Entity::find()
                .filter(adoption_request::Column::Status.eq(RequestStatus::Pending))
                .order_by_asc(adoption_request::Column::CreatedAt)
                .all(db)
                .await?;
            Ok::<_, ServiceError>(rows)
        })
        .await
    }

    pub async fn adoptions_for_customer(
        &self,
        customer_id: i32,
    ) -> Result<Vec<adoption_request::Model>, ServiceError> {
        let db = &*self.db_pool;
        bounded(self.timeout, "adoptions.for_customer", async {
            let rows = adoption_request::Entity::find()
                .filter(adoption_request::Column::CustomerId.eq(customer_id))
                .order_by_desc(adoption_request::Column::CreatedAt)
                .all(db)
                .await?;
            Ok::<_, ServiceError>(rows)
        })
        .await
    }

    /// Records a customer's offer to hand a pet over.
    #[instrument(skip(self, surrender), fields(customer_id = surrender.customer_id))]
    pub async fn submit_surrender(
        &self,
        surrender: NewSurrender,
    ) -> Result<surrender_request::Model, ServiceError> {
        surrender.validate()?;
        let db = &*self.db_pool;

        let request = bounded(self.timeout, "surrenders.submit", async {
            let now = Utc::now();
            let request = surrender_request::ActiveModel {
                customer_id: Set(surrender.customer_id),
                pet_name: Set(surrender.pet_name.clone()),
                species: Set(surrender.species.clone()),
                breed: Set(surrender.breed.clone()),
                age_months: Set(surrender.age_months),
                gender: Set(surrender.gender.clone()),
                reason: Set(surrender.reason.clone()),
                status: Set(RequestStatus::Pending),
                pet_id: Set(None),
                reviewed_by: Set(None),
                created_at: Set(now),
                updated_at: Set(Some(now)),
                ..Default::default()
            }
            .insert(db)
            .await?;
            Ok::<_, ServiceError>(request)
        })
        .await?;

        info!(request_id = request.id, "Surrender requested");
        publish(&self.event_sender, vec![Event::SurrenderRequested(request.id)]);
        Ok(request)
    }

    /// Accepts the pet into the shop at `price`; it is admitted as Available.
    #[instrument(skip(self))]
    pub async fn approve_surrender(
        &self,
        request_id: i32,
        staff_id: i32,
        price: Decimal,
    ) -> Result<(surrender_request::Model, pet::Model), ServiceError> {
        let db = &*self.db_pool;

        let (request, pet) = bounded(self.timeout, "surrenders.approve", async {
            let txn = db.begin().await?;
            let current = find_surrender(&txn, request_id).await?;
            ensure_pending("surrender request", current.status, RequestStatus::Approved)?;

            let pet = admit_pet(
                &txn,
                NewPet {
                    name: current.pet_name.clone(),
                    species: current.species.clone(),
                    breed: current.breed.clone(),
                    age_months: current.age_months,
                    gender: current.gender.clone(),
                    price,
                    health_status: Some("Pending Check-up".to_string()),
                    vaccination_status: Some("Unknown".to_string()),
                    description: current.reason.clone(),
                    image_path: None,
                },
            )
            .await?;

            let mut active: surrender_request::ActiveModel = current.into();
            active.status = Set(RequestStatus::Approved);
            active.pet_id = Set(Some(pet.id));
            active.reviewed_by = Set(Some(staff_id));
            active.updated_at = Set(Some(Utc::now()));
            let request = active.update(&txn).await?;

            txn.commit().await?;
            Ok::<_, ServiceError>((request, pet))
        })
        .await?;

        info!(request_id, pet_id = pet.id, "Surrender approved");
        publish(
            &self.event_sender,
            vec![
                Event::SurrenderReviewed {
                    request_id,
                    status: RequestStatus::Approved,
                },
                Event::PetAdmitted(pet.id),
            ],
        );

        Ok((request, pet))
    }

    #[instrument(skip(self))]
    pub async fn reject_surrender(
        &self,
        request_id: i32,
        staff_id: i32,
    ) -> Result<surrender_request::Model, ServiceError> {
        let db = &*self.db_pool;

        let request = bounded(self.timeout, "surrenders.reject", async {
            let txn = db.begin().await?;
            let current = find_surrender(&txn, request_id).await?;
            ensure_pending("surrender request", current.status, RequestStatus::Rejected)?;

            let mut active: surrender_request::ActiveModel = current.into();
            active.status = Set(RequestStatus::Rejected);
            active.reviewed_by = Set(Some(staff_id));
            active.updated_at = Set(Some(Utc::now()));
            let request = active.update(&txn).await?;

            txn.commit().await?;
            Ok::<_, ServiceError>(request)
        })
        .await?;

        info!(request_id, "Surrender rejected");
        publish(
            &self.event_sender,
            vec![Event::SurrenderReviewed {
                request_id,
                status: RequestStatus::Rejected,
            }],
        );
        Ok(request)
    }

    pub async fn pending_surrenders(&self) -> Result<Vec<surrender_request::Model>, ServiceError> {
        let db = &*self.db_pool;
        bounded(self.timeout, "surrenders.pending", async {
            let rows = surrender_request::Entity::find()
                .filter(surrender_request::Column::Status.eq(RequestStatus::Pending))
                .order_by_asc(surrender_request::Column::CreatedAt)
                .all(db)
                .await?;
            Ok::<_, ServiceError>(rows)
        })
        .await
    }
}

/// Puts a reserved pet back on offer. A pet that left Reserved by another
/// path (for example an admin correction) is left alone.
async fn release_pet<C>(conn: &C, pet_id: i32) -> Result<Option<PetChange>, ServiceError>
where
    C: ConnectionTrait,
{
    match transition_pet(conn, pet_id, &[PetStatus::Reserved], PetStatus::Available).await {
        Ok(change) => Ok(Some(change)),
        Err(ServiceError::ItemUnavailable(reason)) => {
            warn!(pet_id, %reason, "Pet was not reserved, leaving status unchanged");
            Ok(None)
        }
        Err(e) => Err(e),
    }
}

async fn find_surrender<C>(conn: &C, request_id: i32) -> Result<surrender_request::Model, ServiceError>
where
    C: ConnectionTrait,
{
    surrender_request::Entity::find_by_id(request_id)
        .one(conn)
        .await?
        .ok_or_else(|| ServiceError::NotFound(format!("surrender request {}", request_id)))
}

fn pet_events(change: Option<PetChange>) -> Vec<Event> {
    LedgerEffects {
        stock: Vec::new(),
        pets: change.into_iter().collect(),
    }
    .into_events()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(RequestStatus::Pending, RequestStatus::Approved, true)]
    #[case(RequestStatus::Pending, RequestStatus::Rejected, true)]
    #[case(RequestStatus::Pending, RequestStatus::Cancelled, true)]
    #[case(RequestStatus::Pending, RequestStatus::Pending, false)]
    #[case(RequestStatus::Approved, RequestStatus::Rejected, false)]
    #[case(RequestStatus::Rejected, RequestStatus::Approved, false)]
    #[case(RequestStatus::Cancelled, RequestStatus::Approved, false)]
    fn only_pending_requests_are_reviewed(
        #[case] current: RequestStatus,
        #[case] target: RequestStatus,
        #[case] allowed: bool,
    ) {
        assert_eq!(ensure_pending("adoption request", current, target).is_ok(), allowed);
    }
}
