mod common;

use assert_matches::assert_matches;
use common::TestApp;
use petshop_core::{
    entities::UserRole,
    services::{
        inventory::ItemRef,
        orders::{LineItem, NewOrder},
    },
    ServiceError,
};
use rstest::rstest;
use rust_decimal_macros::dec;

#[tokio::test]
async fn a_pet_is_added_to_a_cart_only_once() {
    let app = TestApp::new().await;
    let customer = app.seed_user("Maria Santos", UserRole::Customer).await;
    let rex = app.seed_pet("Rex", dec!(300.00)).await;
    let cart = &app.services.cart;

    assert!(cart.add_to_cart(customer, ItemRef::Pet(rex.id), 1).await.unwrap());
    assert!(!cart.add_to_cart(customer, ItemRef::Pet(rex.id), 3).await.unwrap());

    let view = cart.get_cart(customer).await.unwrap();
    assert_eq!(view.lines.len(), 1);
    assert_eq!(view.lines[0].quantity, 1);
    assert_eq!(view.lines[0].name, "Rex");
    assert!(view.lines[0].available);
}

#[rstest]
#[case::within_stock(3, 5, 3)]
#[case::clamped_to_stock(8, 5, 5)]
#[case::clamped_to_cart_limit(25, 40, 10)]
#[tokio::test]
async fn product_quantity_is_clamped(#[case] requested: i32, #[case] stock: i32, #[case] expected: i32) {
    let app = TestApp::new().await;
    let customer = app.seed_user("Juan Cruz", UserRole::Customer).await;
    let food = app.seed_product("Dog Food", dec!(12.50), stock).await;

    assert!(app
        .services
        .cart
        .add_to_cart(customer, ItemRef::Product(food.id), requested)
        .await
        .unwrap());

    let view = app.services.cart.get_cart(customer).await.unwrap();
    assert_eq!(view.lines[0].quantity, expected);
    // Adding to the cart never touches stock
    assert_eq!(app.stock_of(food.id).await, stock);
}

#[tokio::test]
async fn adding_again_accumulates_up_to_the_limit() {
    let app = TestApp::new().await;
    let customer = app.seed_user("Juan Cruz", UserRole::Customer).await;
    let food = app.seed_product("Dog Food", dec!(12.50), 6).await;
    let cart = &app.services.cart;

    cart.add_to_cart(customer, ItemRef::Product(food.id), 2).await.unwrap();
    cart.add_to_cart(customer, ItemRef::Product(food.id), 3).await.unwrap();
    let view = cart.get_cart(customer).await.unwrap();
    assert_eq!(view.lines.len(), 1);
    assert_eq!(view.lines[0].quantity, 5);

    cart.add_to_cart(customer, ItemRef::Product(food.id), 3).await.unwrap();
    let view = cart.get_cart(customer).await.unwrap();
    assert_eq!(view.lines[0].quantity, 6);
    assert_eq!(view.subtotal(), dec!(75.00));
}

#[tokio::test]
async fn unavailable_items_are_refused() {
    let app = TestApp::new().await;
    let customer = app.seed_user("Juan Cruz", UserRole::Customer).await;
    let empty = app.seed_product("Bird Seed", dec!(3.00), 0).await;
    let cart = &app.services.cart;

    assert_matches!(
        cart.add_to_cart(customer, ItemRef::Product(empty.id), 1).await,
        Err(ServiceError::InsufficientStock(_))
    );
    assert_matches!(
        cart.add_to_cart(customer, ItemRef::Product(empty.id), 0).await,
        Err(ServiceError::ValidationError(_))
    );
    assert_matches!(
        cart.add_to_cart(customer, ItemRef::Pet(404), 1).await,
        Err(ServiceError::NotFound(_))
    );

    let luna = app.seed_pet("Luna", dec!(250.00)).await;
    app.services
        .adoptions
        .submit_adoption(customer, luna.id, None)
        .await
        .unwrap();
    assert_matches!(
        cart.add_to_cart(customer, ItemRef::Pet(luna.id), 1).await,
        Err(ServiceError::ItemUnavailable(_))
    );
    assert!(cart.get_cart(customer).await.unwrap().is_empty());
}

#[tokio::test]
async fn updating_quantity_clamps_or_removes() {
    let app = TestApp::new().await;
    let customer = app.seed_user("Maria Santos", UserRole::Customer).await;
    let food = app.seed_product("Dog Food", dec!(12.50), 4).await;
    let rex = app.seed_pet("Rex", dec!(300.00)).await;
    let cart = &app.services.cart;

    cart.add_to_cart(customer, ItemRef::Product(food.id), 1).await.unwrap();
    cart.add_to_cart(customer, ItemRef::Pet(rex.id), 1).await.unwrap();
    let view = cart.get_cart(customer).await.unwrap();
    let food_entry = view.lines[0].entry_id;
    let rex_entry = view.lines[1].entry_id;

    let updated = cart.update_quantity(food_entry, 9).await.unwrap().unwrap();
    assert_eq!(updated.quantity, 4);
    let pet_row = cart.update_quantity(rex_entry, 3).await.unwrap().unwrap();
    assert_eq!(pet_row.quantity, 1);

    assert_eq!(cart.update_quantity(food_entry, 0).await.unwrap(), None);
    let view = cart.get_cart(customer).await.unwrap();
    assert_eq!(view.lines.len(), 1);
    assert_eq!(view.lines[0].item, ItemRef::Pet(rex.id));

    assert_matches!(
        cart.update_quantity(food_entry, 2).await,
        Err(ServiceError::NotFound(_))
    );
    assert!(cart.remove(rex_entry).await.unwrap());
    assert!(!cart.remove(rex_entry).await.unwrap());
}

#[tokio::test]
async fn clearing_only_touches_one_customer() {
    let app = TestApp::new().await;
    let maria = app.seed_user("Maria Santos", UserRole::Customer).await;
    let juan = app.seed_user("Juan Cruz", UserRole::Customer).await;
    let food = app.seed_product("Dog Food", dec!(12.50), 10).await;
    let toy = app.seed_product("Chew Toy", dec!(5.25), 10).await;
    let cart = &app.services.cart;

    cart.add_to_cart(maria, ItemRef::Product(food.id), 1).await.unwrap();
    cart.add_to_cart(maria, ItemRef::Product(toy.id), 2).await.unwrap();
    cart.add_to_cart(juan, ItemRef::Product(toy.id), 1).await.unwrap();

    assert_eq!(cart.clear_cart(maria).await.unwrap(), 2);
    assert_eq!(cart.clear_cart(maria).await.unwrap(), 0);
    assert!(cart.get_cart(maria).await.unwrap().is_empty());
    assert_eq!(cart.get_cart(juan).await.unwrap().lines.len(), 1);
}

#[tokio::test]
async fn cart_lines_flag_items_that_ran_out() {
    let app = TestApp::new().await;
    let maria = app.seed_user("Maria Santos", UserRole::Customer).await;
    let food = app.seed_product("Dog Food", dec!(12.50), 3).await;

    app.services
        .cart
        .add_to_cart(maria, ItemRef::Product(food.id), 3)
        .await
        .unwrap();
    app.services
        .orders
        .create_order(NewOrder::new(
            maria,
            vec![LineItem::product(food.id, 2, dec!(12.50))],
            "cash",
        ))
        .await
        .unwrap();

    let view = app.services.cart.get_cart(maria).await.unwrap();
    assert!(!view.lines[0].available);
    assert_matches!(
        app.services.orders.checkout(maria, "cash", None).await,
        Err(ServiceError::InsufficientStock(_))
    );
    assert_eq!(app.services.cart.get_cart(maria).await.unwrap().lines.len(), 1);
}

#[tokio::test]
async fn concurrent_adds_of_one_pet_keep_a_single_row() {
    let app = TestApp::new().await;
    let customer = app.seed_user("Maria Santos", UserRole::Customer).await;
    let rex = app.seed_pet("Rex", dec!(300.00)).await;

    let mut tasks = Vec::new();
    for _ in 0..6 {
        let cart = app.services.cart.clone();
        let pet_id = rex.id;
        tasks.push(tokio::spawn(async move {
            cart.add_to_cart(customer, ItemRef::Pet(pet_id), 1).await
        }));
    }

    let mut added = 0;
    for task in tasks {
        if task.await.unwrap().expect("a duplicate add is not an error") {
            added += 1;
        }
    }
    assert_eq!(added, 1);

    let cart = app.services.cart.get_cart(customer).await.unwrap();
    assert_eq!(cart.lines.len(), 1);
    assert_eq!(cart.lines[0].item, ItemRef::Pet(rex.id));
}
