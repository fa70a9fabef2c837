use docbase::{bson, Document, ObjectId};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Document)]
#[document(
    collection = "books",
    sortable("title", "page_count", "published"),
    default_sort = "-published"
)]
pub struct Book {
    pub id: Option<ObjectId>,
    pub title: String,
    #[serde(rename = "pageCount")]
    pub page_count: i32,
    pub published: i32,
}

impl Book {
    pub fn new(title: &str, page_count: i32, published: i32) -> Self {
        Self {
            id: None,
            title: title.to_string(),
            page_count,
            published,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, Document)]
#[document(name = "Note", timestamps, defaults)]
pub struct Note {
    #[document(id)]
    pub key: Option<ObjectId>,
    pub body: String,
    pub pinned: bool,
    pub created_at: Option<bson::DateTime>,
    pub updated_at: Option<bson::DateTime>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Document)]
#[serde(rename_all = "camelCase")]
#[document(collection = "people", sortable("last_name", "id"), default_sort = "last_name, -id")]
pub struct Person {
    pub id: Option<ObjectId>,
    pub first_name: String,
    pub last_name: String,
}
