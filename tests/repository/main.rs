//! End-to-end tests: derived models flowing through a repository backed by
//! the in-memory store.

mod models;

use docbase::bson::{doc, Bson};
use docbase::{
    connect, to_json, ConfigurationError, Database, Direction, Document, DumpOptions, Error,
    Fetched, FindOneAndModifyOptions, FindOneOptions, FindOptions, ObjectId, Pagination,
    Projection, Repository, RepositoryConfig, ReturnDocument, SortBuilder, SortOrder, Settings,
    Timestamped,
};
use models::{Book, Note, Person};

async fn database() -> Database {
    connect(&Settings::default()).await.unwrap()
}

async fn seed_books(books: &Repository<Book>) {
    let shelf = [
        Book::new("Dune", 412, 1965),
        Book::new("Emma", 474, 1815),
        Book::new("Ubik", 202, 1969),
        Book::new("Kindred", 264, 1979),
        Book::new("Beloved", 324, 1987),
    ];
    for book in &shelf {
        books.insert_record(book, None).await.unwrap();
    }
}

fn titles(found: &[Fetched<Book>]) -> Vec<&str> {
    found
        .iter()
        .filter_map(Fetched::record)
        .map(|book| book.title.as_str())
        .collect()
}

#[test]
fn derived_metadata() {
    assert_eq!(Book::NAME, "Book");
    assert_eq!(Book::COLLECTION, "books");
    assert_eq!(Book::storage_key("page_count"), "pageCount");
    assert_eq!(Book::storage_key("id"), "_id");

    assert_eq!(Note::COLLECTION, "notes");
    assert!(Note::TIMESTAMPS);
    assert_eq!(Note::ID_KEY, "key");
    assert_eq!(Note::storage_key("key"), "_id");

    assert_eq!(Person::COLLECTION, "people");
    assert_eq!(Person::storage_key("first_name"), "firstName");
}

#[tokio::test]
async fn connect_picks_backend_from_url() {
    let db = database().await;
    assert_eq!(db.name(), "main");

    let settings = Settings {
        database_url: "redis://localhost".to_string(),
        ..Settings::default()
    };
    let err = connect(&settings).await.unwrap_err();
    assert!(matches!(
        err,
        Error::Configuration(ConfigurationError::UnsupportedUrl(_))
    ));
}

#[cfg(not(feature = "mongodb"))]
#[tokio::test]
async fn mongodb_url_needs_the_feature() {
    let settings = Settings {
        database_url: "mongodb://localhost:27017".to_string(),
        ..Settings::default()
    };
    let err = connect(&settings).await.unwrap_err();
    assert!(matches!(
        err,
        Error::Configuration(ConfigurationError::DriverUnavailable("mongodb"))
    ));
}

#[tokio::test]
async fn insert_find_delete_round_trip() {
    let db = database().await;
    let books = Repository::<Book>::open(&db, RepositoryConfig::converting::<Book>()).unwrap();

    let mut book = Book::new("Dune", 412, 1965);
    let id = book.ensure_id();
    let inserted = books.insert_record(&book, None).await.unwrap();
    assert_eq!(inserted.inserted_id, Bson::from(id));

    let found = books
        .find_one(doc! { "_id": id }, FindOneOptions::new(), None)
        .await
        .unwrap();
    assert_eq!(found, Some(Fetched::Record(book.clone())));

    let stored = db
        .collection("books")
        .find_one(doc! { "_id": id }, None, None, None)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.get_i32("pageCount").unwrap(), 412);
    assert_eq!(to_json(&stored)["_id"], id.to_hex());

    let deleted = books.delete_one(doc! { "_id": id }, None).await.unwrap();
    assert_eq!(deleted.deleted_count, 1);

    let err = books
        .find_one(doc! { "_id": id }, FindOneOptions::new(), None)
        .await
        .unwrap_err();
    assert!(err.is_not_found());
    assert_eq!(err.to_string(), "Book not found");
    assert_eq!(err.status_code(), Some(404));

    let lenient = RepositoryConfig::converting::<Book>().raise_not_found(false);
    let missing = books
        .find_one(doc! { "_id": id }, FindOneOptions::new().config(lenient), None)
        .await
        .unwrap();
    assert!(missing.is_none());
}

#[tokio::test]
async fn sorted_page_of_records() {
    let db = database().await;
    let books = Repository::<Book>::open(&db, RepositoryConfig::converting::<Book>()).unwrap();
    seed_books(&books).await;

    let order = SortBuilder::parse("-page_count, rating")
        .unwrap()
        .build::<Book>()
        .unwrap();
    assert_eq!(
        order.to_pairs(),
        vec![("pageCount".to_string(), -1), ("_id".to_string(), -1)]
    );

    let settings = Settings::default();
    let page = Pagination::from_query(Some(2), Some(1), &settings.pagination).unwrap();
    let found = books
        .find(doc! {}, FindOptions::new().sort(order).paginate(page), None)
        .await
        .unwrap();
    assert_eq!(titles(&found), vec!["Dune", "Beloved"]);
}

#[tokio::test]
async fn default_order_applies_without_usable_fields() {
    let db = database().await;
    let books = Repository::<Book>::open(&db, RepositoryConfig::converting::<Book>()).unwrap();
    seed_books(&books).await;

    let order = SortBuilder::from_query(Some("-rating"))
        .unwrap()
        .build::<Book>()
        .unwrap();
    assert_eq!(
        order,
        SortOrder::new(vec![("published".to_string(), Direction::Descending)])
    );

    let found = books
        .find(doc! {}, FindOptions::new().sort(order).limit(3), None)
        .await
        .unwrap();
    assert_eq!(titles(&found), vec!["Beloved", "Kindred", "Ubik"]);

    let err = SortBuilder::parse("rating")
        .unwrap()
        .strict(true)
        .build::<Book>()
        .unwrap_err();
    assert_eq!(err.status_code(), Some(400));
}

#[test]
fn default_sort_uses_storage_keys() {
    let order = SortBuilder::new().build::<Person>().unwrap();
    assert_eq!(
        order.to_document(),
        doc! { "lastName": 1, "_id": -1 }
    );
}

#[tokio::test]
async fn projected_reads_stay_raw() {
    let db = database().await;
    let books = Repository::<Book>::open(&db, RepositoryConfig::raw()).unwrap();
    seed_books(&books).await;

    let projection = Projection::new(Some("title, page_count"), None)
        .unwrap()
        .to_db::<Book>();
    assert_eq!(projection, Some(doc! { "title": true, "pageCount": true }));

    let found = books
        .find(
            doc! { "published": { "$lt": 1900 } },
            FindOptions::new().projection(projection),
            None,
        )
        .await
        .unwrap();
    assert_eq!(found.len(), 1);
    let raw = found[0].raw().unwrap();
    let keys: Vec<&str> = raw.keys().map(String::as_str).collect();
    assert_eq!(keys, vec!["_id", "title", "pageCount"]);
    assert_eq!(raw.get_str("title").unwrap(), "Emma");
}

#[tokio::test]
async fn modify_and_return_records() {
    let db = database().await;
    let books = Repository::<Book>::open(&db, RepositoryConfig::converting::<Book>()).unwrap();
    seed_books(&books).await;

    let updated = books
        .find_one_and_update(
            doc! { "title": "Ubik" },
            doc! { "$inc": { "pageCount": 10 } },
            FindOneAndModifyOptions::new(),
            None,
        )
        .await
        .unwrap()
        .and_then(Fetched::into_record)
        .unwrap();
    assert_eq!(updated.page_count, 212);

    let before = books
        .find_one_and_update(
            doc! { "title": "Ubik" },
            doc! { "$set": { "published": 1970 } },
            FindOneAndModifyOptions::new().return_document(ReturnDocument::Before),
            None,
        )
        .await
        .unwrap()
        .and_then(Fetched::into_record)
        .unwrap();
    assert_eq!(before.published, 1969);

    let err = books
        .find_one_and_update(
            doc! { "title": "Solaris" },
            doc! { "$set": { "published": 1961 } },
            FindOneAndModifyOptions::new(),
            None,
        )
        .await
        .unwrap_err();
    assert!(err.is_not_found());

    assert_eq!(books.count_documents(doc! {}, None).await.unwrap(), 5);
}

#[tokio::test]
async fn aggregate_with_query_stages() {
    let db = database().await;
    let books = Repository::<Book>::open(&db, RepositoryConfig::converting::<Book>()).unwrap();
    seed_books(&books).await;

    let order = SortBuilder::parse("title").unwrap().build::<Book>().unwrap();
    let settings = Settings::default();
    let mut pipeline = vec![doc! { "$match": { "published": { "$gte": 1960 } } }, order.to_stage()];
    pipeline.extend(
        Pagination::new(1, 2, &settings.pagination)
            .unwrap()
            .to_stages(),
    );
    let rows = books.aggregate(pipeline, None).await.unwrap();
    let found: Vec<&str> = rows.iter().map(|row| row.get_str("title").unwrap()).collect();
    assert_eq!(found, vec!["Dune", "Kindred"]);

    let counted = books
        .aggregate(
            vec![
                doc! { "$match": { "pageCount": { "$gt": 300 } } },
                doc! { "$count": "total" },
            ],
            None,
        )
        .await
        .unwrap();
    assert_eq!(counted, vec![doc! { "total": 3_i64 }]);
}

#[tokio::test]
async fn timestamps_follow_identifier_and_updates() {
    let db = database().await;
    let notes = Repository::<Note>::open(&db, RepositoryConfig::converting::<Note>()).unwrap();

    let mut note = Note {
        body: "draft".to_string(),
        ..Note::default()
    };
    let id = note.ensure_id();
    let stored = note.to_db(&DumpOptions::default()).unwrap();
    assert_eq!(stored.get_datetime("created_at").unwrap(), &id.timestamp());
    assert_eq!(stored.get("updated_at"), stored.get("created_at"));
    assert_eq!(note.to_db(&DumpOptions::default()).unwrap(), stored);
    notes.insert_one(stored, None).await.unwrap();

    let mut loaded = notes
        .find_one(doc! { "_id": id }, FindOneOptions::new(), None)
        .await
        .unwrap()
        .and_then(Fetched::into_record)
        .unwrap();
    assert_eq!(loaded.key, Some(id));
    assert_eq!(loaded.created_at(), Some(id.timestamp()));

    loaded.body = "final".to_string();
    loaded.mark_updated();
    let replaced = notes
        .replace_one(
            doc! { "_id": id },
            loaded.to_db(&DumpOptions::default()).unwrap(),
            false,
            None,
        )
        .await
        .unwrap();
    assert_eq!(replaced.modified_count, 1);

    let reloaded = notes
        .find_one(doc! { "_id": id }, FindOneOptions::new(), None)
        .await
        .unwrap()
        .and_then(Fetched::into_record)
        .unwrap();
    assert_eq!(reloaded.body, "final");
    assert_eq!(reloaded.created_at, Some(id.timestamp()));
    assert!(reloaded.updated_at.unwrap() >= reloaded.created_at.unwrap());
}

#[test]
fn dump_skips_defaults_when_asked() {
    let note = Note::default();
    let stored = note
        .to_db(&DumpOptions::new().exclude_defaults(true))
        .unwrap();
    let keys: Vec<&str> = stored.keys().map(String::as_str).collect();
    assert_eq!(keys, vec!["_id", "created_at", "updated_at"]);

    let person = Person {
        id: Some(ObjectId::new()),
        first_name: "Octavia".to_string(),
        last_name: "Butler".to_string(),
    };
    let stored = person.to_db(&DumpOptions::default()).unwrap();
    assert_eq!(stored.get_str("firstName").unwrap(), "Octavia");
    let plain = person.to_db(&DumpOptions::new().by_alias(false)).unwrap();
    assert_eq!(plain.get_str("first_name").unwrap(), "Octavia");
    assert_eq!(Person::from_db(Some(stored)).unwrap(), Some(person));
}
