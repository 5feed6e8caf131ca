mod common;

use assert_matches::assert_matches;
use common::TestApp;
use petshop_core::{
    entities::{PetStatus, RequestStatus, UserRole},
    services::{
        adoptions::NewSurrender,
        orders::{LineItem, NewOrder},
    },
    ServiceError,
};
use rust_decimal_macros::dec;

#[tokio::test]
async fn approved_adoption_adopts_the_pet() {
    let app = TestApp::new().await;
    let customer = app.seed_user("Maria Santos", UserRole::Customer).await;
    let staff = app.seed_user("Lea Tan", UserRole::Staff).await;
    let luna = app.seed_pet("Luna", dec!(250.00)).await;
    let adoptions = &app.services.adoptions;

    let request = adoptions
        .submit_adoption(customer, luna.id, Some("fenced yard".to_string()))
        .await
        .unwrap();
    assert_eq!(request.status, RequestStatus::Pending);
    assert_eq!(app.pet_status(luna.id).await, PetStatus::Reserved);
    assert_eq!(adoptions.pending_adoptions().await.unwrap().len(), 1);

    // A reserved pet can be neither requested again nor sold
    let other = app.seed_user("Juan Cruz", UserRole::Customer).await;
    assert_matches!(
        adoptions.submit_adoption(other, luna.id, None).await,
        Err(ServiceError::ItemUnavailable(_))
    );
    assert_matches!(
        app.services
            .orders
            .create_order(NewOrder::new(other, vec![LineItem::pet(luna.id, dec!(250.00))], "cash"))
            .await,
        Err(ServiceError::ItemUnavailable(_))
    );

    let approved = adoptions.approve_adoption(request.id, staff).await.unwrap();
    assert_eq!(approved.status, RequestStatus::Approved);
    assert_eq!(approved.reviewed_by, Some(staff));
    assert_eq!(app.pet_status(luna.id).await, PetStatus::Adopted);
    assert!(adoptions.pending_adoptions().await.unwrap().is_empty());

    assert_matches!(
        adoptions.reject_adoption(request.id, staff).await,
        Err(ServiceError::InvalidTransition { .. })
    );
}

#[tokio::test]
async fn rejected_or_withdrawn_requests_release_the_pet() {
    let app = TestApp::new().await;
    let maria = app.seed_user("Maria Santos", UserRole::Customer).await;
    let juan = app.seed_user("Juan Cruz", UserRole::Customer).await;
    let staff = app.seed_user("Lea Tan", UserRole::Staff).await;
    let luna = app.seed_pet("Luna", dec!(250.00)).await;
    let adoptions = &app.services.adoptions;

    let first = adoptions.submit_adoption(maria, luna.id, None).await.unwrap();
    let rejected = adoptions.reject_adoption(first.id, staff).await.unwrap();
    assert_eq!(rejected.status, RequestStatus::Rejected);
    assert_eq!(app.pet_status(luna.id).await, PetStatus::Available);

    let second = adoptions.submit_adoption(juan, luna.id, None).await.unwrap();
    assert_matches!(
        adoptions.cancel_adoption(second.id, maria).await,
        Err(ServiceError::Forbidden(_))
    );
    assert_eq!(app.pet_status(luna.id).await, PetStatus::Reserved);

    let withdrawn = adoptions.cancel_adoption(second.id, juan).await.unwrap();
    assert_eq!(withdrawn.status, RequestStatus::Cancelled);
    assert_eq!(app.pet_status(luna.id).await, PetStatus::Available);

    let history = adoptions.adoptions_for_customer(juan).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_matches!(
        adoptions.approve_adoption(404, staff).await,
        Err(ServiceError::NotFound(_))
    );
}

#[tokio::test]
async fn approved_surrender_admits_the_pet() {
    let app = TestApp::new().await;
    let customer = app.seed_user("Ana Reyes", UserRole::Customer).await;
    let staff = app.seed_user("Lea Tan", UserRole::Staff).await;
    let adoptions = &app.services.adoptions;

    let request = adoptions
        .submit_surrender(NewSurrender {
            customer_id: customer,
            pet_name: "Mochi".to_string(),
            species: "Cat".to_string(),
            breed: Some("Persian".to_string()),
            age_months: Some(24),
            gender: Some("Female".to_string()),
            reason: Some("moving abroad".to_string()),
        })
        .await
        .unwrap();
    assert_eq!(request.status, RequestStatus::Pending);
    assert_eq!(request.pet_id, None);
    assert_eq!(adoptions.pending_surrenders().await.unwrap().len(), 1);

    let (approved, pet) = adoptions
        .approve_surrender(request.id, staff, dec!(150.00))
        .await
        .unwrap();
    assert_eq!(approved.status, RequestStatus::Approved);
    assert_eq!(approved.pet_id, Some(pet.id));
    assert_eq!(pet.name, "Mochi");
    assert_eq!(pet.status, PetStatus::Available);
    assert_eq!(pet.health_status.as_deref(), Some("Pending Check-up"));

    let on_offer = app.services.inventory.available_pets().await.unwrap();
    assert!(on_offer.iter().any(|p| p.id == pet.id));

    assert_matches!(
        adoptions.reject_surrender(request.id, staff).await,
        Err(ServiceError::InvalidTransition { .. })
    );
}

#[tokio::test]
async fn invalid_surrenders_are_rejected_up_front() {
    let app = TestApp::new().await;
    let customer = app.seed_user("Ana Reyes", UserRole::Customer).await;
    let staff = app.seed_user("Lea Tan", UserRole::Staff).await;
    let adoptions = &app.services.adoptions;

    assert_matches!(
        adoptions
            .submit_surrender(NewSurrender {
                customer_id: customer,
                pet_name: String::new(),
                species: "Dog".to_string(),
                breed: None,
                age_months: None,
                gender: None,
                reason: None,
            })
            .await,
        Err(ServiceError::ValidationError(_))
    );

    let request = adoptions
        .submit_surrender(NewSurrender {
            customer_id: customer,
            pet_name: "Bantay".to_string(),
            species: "Dog".to_string(),
            breed: None,
            age_months: None,
            gender: None,
            reason: None,
        })
        .await
        .unwrap();
    let rejected = adoptions.reject_surrender(request.id, staff).await.unwrap();
    assert_eq!(rejected.status, RequestStatus::Rejected);
    assert_eq!(rejected.pet_id, None);
    assert!(adoptions.pending_surrenders().await.unwrap().is_empty());
}
