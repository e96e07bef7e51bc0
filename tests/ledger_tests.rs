//! Ledger operations against a live store
//!
//! These tests verify:
//! - registration grants the starting balance and one default farm
//! - buying debits the price and refuses overdrafts
//! - animal and product sales credit the right amounts exactly once
//! - ownership checks on every farm-scoped operation
//! - farm create, rename and cascading delete

mod support;

use assert_matches::assert_matches;
use farm_ledger::ErrorKind;
use farm_ledger::domain::{AnimalId, FarmId, ProductId, ProductKind, Species};
use farm_ledger::model::BuyAnimalRequest;
use rust_decimal_macros::dec;
use support::Farmyard;

#[tokio::test]
async fn test_registration_starts_with_balance_and_default_farm() {
    let yard = Farmyard::new();
    let (user, farm) = yard.register("alice").await;

    assert_eq!(user.balance, dec!(1000));
    assert_eq!(farm.name.as_str(), "My Farm");
    assert_eq!(farm.owner_id, user.id);
    assert_eq!(yard.ledger().list_farms(user.id).unwrap().len(), 1);
}

#[tokio::test]
async fn test_registration_rejects_taken_username_and_bad_email() {
    let yard = Farmyard::new();
    yard.register("alice").await;

    let taken = yard
        .ledger()
        .register_user("alice", "other@example.com")
        .await
        .unwrap_err();
    assert_eq!(taken.kind, ErrorKind::InvalidOperation);

    let bad_email = yard
        .ledger()
        .register_user("bob", "not-an-email")
        .await
        .unwrap_err();
    assert_eq!(bad_email.kind, ErrorKind::InvalidOperation);

    let spaced = yard
        .ledger()
        .register_user("bob smith", "bob@example.com")
        .await
        .unwrap_err();
    assert_eq!(spaced.kind, ErrorKind::InvalidOperation);
}

#[tokio::test]
async fn test_buy_debits_price_and_schedules_production() {
    let yard = Farmyard::new();
    let (user, farm) = yard.register("alice").await;

    let cow = yard.buy(&user, &farm, Species::Cow).await;

    assert_eq!(yard.balance(&user), dec!(600));
    assert_eq!(cow.purchase_price, dec!(400));
    assert_eq!(cow.sell_price, dec!(320));
    assert_eq!(cow.production_interval_seconds, 15);
    assert_eq!(cow.lifespan_seconds, 600);
    assert_eq!(
        cow.next_production_time,
        Some(support::epoch() + chrono::Duration::seconds(15))
    );
    assert_eq!(
        yard.ledger().list_farm_animals(farm.id, user.id).unwrap().len(),
        1
    );
}

#[tokio::test]
async fn test_buy_with_insufficient_balance_changes_nothing() {
    let yard = Farmyard::new();
    let (user, farm) = yard.register("alice").await;

    yard.buy(&user, &farm, Species::Cow).await;
    yard.buy(&user, &farm, Species::Cow).await;

    let error = yard
        .ledger()
        .buy_animal(farm.id, user.id, BuyAnimalRequest::new(Species::Cow, "Third"))
        .await
        .unwrap_err();

    assert_eq!(error.kind, ErrorKind::InvalidOperation);
    assert!(error.message.contains("insufficient balance"));
    assert_eq!(yard.balance(&user), dec!(200));
    assert_eq!(
        yard.ledger().list_farm_animals(farm.id, user.id).unwrap().len(),
        2
    );
}

#[tokio::test]
async fn test_buy_with_custom_price_and_interval() {
    let yard = Farmyard::new();
    let (user, farm) = yard.register("alice").await;

    let request = BuyAnimalRequest::new(Species::Sheep, "Dolly")
        .with_price(dec!(125))
        .with_interval(7);
    let sheep = yard
        .ledger()
        .buy_animal(farm.id, user.id, request)
        .await
        .unwrap();

    assert_eq!(sheep.sell_price, dec!(100));
    assert_eq!(sheep.production_interval_seconds, 7);
    assert_eq!(yard.balance(&user), dec!(875));
}

#[tokio::test]
async fn test_buy_on_missing_or_foreign_farm() {
    let yard = Farmyard::new();
    let (alice, alice_farm) = yard.register("alice").await;
    let (bob, _) = yard.register("bob").await;

    let missing = yard
        .ledger()
        .buy_animal(
            FarmId::new(),
            alice.id,
            BuyAnimalRequest::new(Species::Chicken, "Ghost"),
        )
        .await
        .unwrap_err();
    assert_eq!(missing.kind, ErrorKind::NotFound);

    let foreign = yard
        .ledger()
        .buy_animal(
            alice_farm.id,
            bob.id,
            BuyAnimalRequest::new(Species::Chicken, "Intruder"),
        )
        .await
        .unwrap_err();
    assert_eq!(foreign.kind, ErrorKind::Forbidden);
    assert_eq!(yard.balance(&bob), dec!(1000));
}

#[tokio::test]
async fn test_sell_animal_credits_once() {
    let yard = Farmyard::new();
    let (user, farm) = yard.register("alice").await;
    let cow = yard.buy(&user, &farm, Species::Cow).await;

    let sale = yard
        .ledger()
        .sell_animal(cow.id, user.id)
        .await
        .unwrap()
        .expect("animal sold");
    assert_eq!(sale.proceeds, dec!(320));
    assert_eq!(sale.balance_after, dec!(920));

    let again = yard.ledger().sell_animal(cow.id, user.id).await.unwrap();
    assert!(again.is_none());
    assert_eq!(yard.balance(&user), dec!(920));

    let unknown = yard
        .ledger()
        .sell_animal(AnimalId::new(), user.id)
        .await
        .unwrap();
    assert!(unknown.is_none());
}

#[tokio::test]
async fn test_sell_animal_of_another_user_is_forbidden() {
    let yard = Farmyard::new();
    let (alice, farm) = yard.register("alice").await;
    let (bob, _) = yard.register("bob").await;
    let cow = yard.buy(&alice, &farm, Species::Cow).await;

    let error = yard.ledger().sell_animal(cow.id, bob.id).await.unwrap_err();

    assert_eq!(error.kind, ErrorKind::Forbidden);
    assert!(yard.ledger().get_animal(cow.id, alice.id).is_ok());
    assert_matches!(
        yard.ledger().get_animal(cow.id, bob.id),
        Err(e) if e.kind == ErrorKind::Forbidden
    );
}

#[tokio::test]
async fn test_sell_product_partial_then_remaining() {
    let yard = Farmyard::new();
    let (user, farm) = yard.register("alice").await;
    yard.buy(&user, &farm, Species::Chicken).await;

    for _ in 0..4 {
        yard.advance(10);
        yard.production_tick();
    }
    let eggs = yard.ledger().list_farm_products(farm.id, user.id).unwrap();
    assert_eq!(eggs.len(), 1);
    assert_eq!(eggs[0].product_kind, ProductKind::Egg);
    assert_eq!(eggs[0].quantity, 4);
    let before = yard.balance(&user);

    let sale = yard
        .ledger()
        .sell_product(eggs[0].id, user.id, 3)
        .await
        .unwrap()
        .expect("stock present");
    assert_eq!(sale.proceeds, dec!(7.5));
    assert_eq!(sale.remaining_quantity, 1);
    assert_eq!(yard.balance(&user), before + dec!(7.5));

    let sale = yard
        .ledger()
        .sell_product(eggs[0].id, user.id, 1)
        .await
        .unwrap()
        .expect("stock present");
    assert_eq!(sale.remaining_quantity, 0);
    assert!(
        yard.ledger()
            .list_farm_products(farm.id, user.id)
            .unwrap()
            .is_empty()
    );

    let gone = yard
        .ledger()
        .sell_product(eggs[0].id, user.id, 1)
        .await
        .unwrap();
    assert!(gone.is_none());
}

#[tokio::test]
async fn test_sell_product_rejects_oversell_and_zero() {
    let yard = Farmyard::new();
    let (user, farm) = yard.register("alice").await;
    yard.buy(&user, &farm, Species::Cow).await;
    yard.advance(15);
    yard.production_tick();

    let milk = &yard.ledger().list_farm_products(farm.id, user.id).unwrap()[0];
    let before = yard.balance(&user);

    let oversell = yard
        .ledger()
        .sell_product(milk.id, user.id, 2)
        .await
        .unwrap_err();
    assert_eq!(oversell.kind, ErrorKind::InvalidOperation);

    let zero = yard
        .ledger()
        .sell_product(milk.id, user.id, 0)
        .await
        .unwrap_err();
    assert_eq!(zero.kind, ErrorKind::InvalidOperation);

    assert_eq!(yard.balance(&user), before);
    assert_eq!(
        yard.ledger().get_product(milk.id, user.id).unwrap().quantity,
        1
    );
}

#[tokio::test]
async fn test_sell_all_products_liquidates_every_row() {
    let yard = Farmyard::new();
    let (user, farm) = yard.register("alice").await;
    yard.buy(&user, &farm, Species::Chicken).await;
    yard.buy(&user, &farm, Species::Sheep).await;

    // 20s: two egg units and one wool unit
    yard.advance(10);
    yard.production_tick();
    yard.advance(10);
    yard.production_tick();

    let before = yard.balance(&user);
    let total = yard
        .ledger()
        .sell_all_products(farm.id, user.id)
        .await
        .unwrap();

    assert_eq!(total, dec!(55));
    assert_eq!(yard.balance(&user), before + dec!(55));
    assert!(
        yard.ledger()
            .list_farm_products(farm.id, user.id)
            .unwrap()
            .is_empty()
    );

    let nothing = yard
        .ledger()
        .sell_all_products(farm.id, user.id)
        .await
        .unwrap();
    assert_eq!(nothing, dec!(0));
}

#[tokio::test]
async fn test_sell_all_products_sums_quantity_times_unit_price() {
    let yard = Farmyard::new();
    yard.state.prices().set_price(ProductKind::Milk, dec!(50));
    yard.state.prices().set_price(ProductKind::Egg, dec!(2));

    let (user, farm) = yard.register("alice").await;
    yard.ledger()
        .buy_animal(
            farm.id,
            user.id,
            BuyAnimalRequest::new(Species::Cow, "Daisy").with_interval(50),
        )
        .await
        .unwrap();
    yard.buy(&user, &farm, Species::Chicken).await;

    // 100s: ten eggs, milk at 50s and 100s
    for _ in 0..10 {
        yard.advance(10);
        yard.production_tick();
    }

    let mut stock: Vec<_> = yard
        .ledger()
        .list_farm_products(farm.id, user.id)
        .unwrap()
        .into_iter()
        .map(|product| (product.product_kind, product.quantity, product.unit_sale_price))
        .collect();
    stock.sort_by_key(|(kind, _, _)| kind.to_string());
    assert_eq!(
        stock,
        vec![
            (ProductKind::Egg, 10, dec!(2)),
            (ProductKind::Milk, 2, dec!(50)),
        ]
    );

    let before = yard.balance(&user);
    let total = yard
        .ledger()
        .sell_all_products(farm.id, user.id)
        .await
        .unwrap();

    assert_eq!(total, dec!(120));
    assert_eq!(yard.balance(&user), before + dec!(120));
    assert!(
        yard.ledger()
            .list_farm_products(farm.id, user.id)
            .unwrap()
            .is_empty()
    );
}

#[tokio::test]
async fn test_farm_create_rename_and_cascading_delete() {
    let yard = Farmyard::new();
    let (user, _) = yard.register("alice").await;

    let orchard = yard.ledger().create_farm(user.id, "Orchard").await.unwrap();
    let renamed = yard
        .ledger()
        .rename_farm(orchard.id, user.id, "  Hilltop  ")
        .await
        .unwrap();
    assert_eq!(renamed.name.as_str(), "Hilltop");

    let hen = yard.buy(&user, &renamed, Species::Chicken).await;
    yard.advance(10);
    yard.production_tick();
    let eggs = yard.ledger().list_farm_products(orchard.id, user.id).unwrap();
    assert_eq!(eggs.len(), 1);

    assert!(yard.ledger().delete_farm(orchard.id, user.id).await.unwrap());
    assert!(!yard.ledger().delete_farm(orchard.id, user.id).await.unwrap());

    assert_matches!(
        yard.ledger().get_animal(hen.id, user.id),
        Err(e) if e.kind == ErrorKind::NotFound
    );
    assert_matches!(
        yard.ledger().get_product(eggs[0].id, user.id),
        Err(e) if e.kind == ErrorKind::NotFound
    );
    assert_eq!(yard.ledger().list_farms(user.id).unwrap().len(), 1);
}

#[tokio::test]
async fn test_foreign_farm_operations_are_forbidden() {
    let yard = Farmyard::new();
    let (alice, farm) = yard.register("alice").await;
    let (bob, _) = yard.register("bob").await;

    assert_matches!(
        yard.ledger().rename_farm(farm.id, bob.id, "Mine now").await,
        Err(e) if e.kind == ErrorKind::Forbidden
    );
    assert_matches!(
        yard.ledger().delete_farm(farm.id, bob.id).await,
        Err(e) if e.kind == ErrorKind::Forbidden
    );
    assert_matches!(
        yard.ledger().sell_all_products(farm.id, bob.id).await,
        Err(e) if e.kind == ErrorKind::Forbidden
    );
    assert_matches!(
        yard.ledger().list_farm_animals(farm.id, bob.id),
        Err(e) if e.kind == ErrorKind::Forbidden
    );
    assert_eq!(yard.ledger().get_farm(farm.id, alice.id).unwrap().id, farm.id);
}

#[tokio::test]
async fn test_queries_on_unknown_rows() {
    let yard = Farmyard::new();
    let (user, _) = yard.register("alice").await;

    assert_matches!(
        yard.ledger().get_product(ProductId::new(), user.id),
        Err(e) if e.kind == ErrorKind::NotFound
    );
    assert_matches!(
        yard.ledger().get_farm(FarmId::new(), user.id),
        Err(e) if e.kind == ErrorKind::NotFound
    );
    assert_matches!(
        yard.ledger().get_balance(farm_ledger::domain::UserId::new()),
        Err(e) if e.kind == ErrorKind::NotFound
    );
}
