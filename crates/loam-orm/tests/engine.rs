//! End-to-end engine tests over a scripted driver.

use std::cell::Cell;
use std::collections::HashMap;
use std::rc::Rc;

use loam_orm::{
    row, save_entity, Collection, Context, Customize, Driver, Entity, EntitySaver, EventKind,
    FluentQuery, HasForeign, HasMany, HasOne, ManyToMany, Notification, NotificationBus, OrmError,
    RecordingDriver, Row,
};
use loam_sql_core::{
    BooleanColumn, Column, IntegerColumn, OrderDirection, SchemaError, SchemaRegistry, SqlValue,
    TableSchema, TextColumn, Where,
};

#[derive(Debug, Clone)]
struct Author {
    id: Option<i64>,
    name: String,
    active: bool,
    books: Option<Collection<Book>>,
}

impl Entity for Author {
    fn table() -> &'static str {
        "authors"
    }

    fn from_row(row: &Row) -> loam_orm::Result<Self> {
        Ok(Self {
            id: match row.get("id") {
                Some(SqlValue::Int(n)) => Some(*n),
                _ => None,
            },
            name: match row.get("name") {
                Some(SqlValue::Text(s)) => s.clone(),
                _ => String::new(),
            },
            active: matches!(
                row.get("active"),
                Some(SqlValue::Bool(true) | SqlValue::Int(1))
            ),
            books: None,
        })
    }

    fn to_row(&self) -> Row {
        row(&[
            ("id", self.id.map_or(SqlValue::Null, SqlValue::Int)),
            ("name", SqlValue::Text(self.name.clone())),
            ("active", SqlValue::Bool(self.active)),
        ])
    }

    fn pk(&self) -> Option<SqlValue> {
        self.id.map(SqlValue::Int)
    }

    fn set_pk(&mut self, pk: SqlValue) {
        if let SqlValue::Int(n) = pk {
            self.id = Some(n);
        }
    }

    fn load_relation(
        ctx: &Rc<Context>,
        driver: &dyn Driver,
        path: &str,
        models: &mut Collection<Self>,
        customize: &Customize,
    ) -> loam_orm::Result<()> {
        let (head, _rest) = loam_orm::split_path(path);
        match head {
            "books" => {
                let relation = HasMany::<Self, Book>::new(ctx, "author_id")?;
                let mut loaded = relation.eager_load(driver, &models.pks(), customize)?;
                for author in models.values_mut() {
                    let Some(id) = author.id else { continue };
                    let slice = loaded
                        .remove(&SqlValue::Int(id).to_key())
                        .unwrap_or_else(Book::collection);
                    author.books = Some(slice);
                }
                Ok(())
            }
            other => Err(OrmError::UnknownRelation(other.to_string())),
        }
    }
}

#[derive(Debug, Clone)]
struct Book {
    id: Option<i64>,
    author_id: Option<i64>,
    title: String,
}

impl Entity for Book {
    fn table() -> &'static str {
        "books"
    }

    fn from_row(row: &Row) -> loam_orm::Result<Self> {
        Ok(Self {
            id: match row.get("id") {
                Some(SqlValue::Int(n)) => Some(*n),
                _ => None,
            },
            author_id: match row.get("author_id") {
                Some(SqlValue::Int(n)) => Some(*n),
                _ => None,
            },
            title: match row.get("title") {
                Some(SqlValue::Text(s)) => s.clone(),
                _ => String::new(),
            },
        })
    }

    fn to_row(&self) -> Row {
        row(&[
            ("id", self.id.map_or(SqlValue::Null, SqlValue::Int)),
            (
                "author_id",
                self.author_id.map_or(SqlValue::Null, SqlValue::Int),
            ),
            ("title", SqlValue::Text(self.title.clone())),
        ])
    }

    fn pk(&self) -> Option<SqlValue> {
        self.id.map(SqlValue::Int)
    }

    fn set_pk(&mut self, pk: SqlValue) {
        if let SqlValue::Int(n) = pk {
            self.id = Some(n);
        }
    }
}

#[derive(Debug, Clone)]
struct Tag {
    id: Option<i64>,
    label: String,
}

impl Entity for Tag {
    fn table() -> &'static str {
        "tags"
    }

    fn from_row(row: &Row) -> loam_orm::Result<Self> {
        Ok(Self {
            id: match row.get("id") {
                Some(SqlValue::Int(n)) => Some(*n),
                _ => None,
            },
            label: match row.get("label") {
                Some(SqlValue::Text(s)) => s.clone(),
                _ => String::new(),
            },
        })
    }

    fn to_row(&self) -> Row {
        row(&[
            ("id", self.id.map_or(SqlValue::Null, SqlValue::Int)),
            ("label", SqlValue::Text(self.label.clone())),
        ])
    }

    fn pk(&self) -> Option<SqlValue> {
        self.id.map(SqlValue::Int)
    }

    fn set_pk(&mut self, pk: SqlValue) {
        if let SqlValue::Int(n) = pk {
            self.id = Some(n);
        }
    }
}

fn registry() -> SchemaRegistry {
    let mut schemas = SchemaRegistry::new();
    schemas.register(
        TableSchema::new("authors", "id")
            .column(Column::new("id", IntegerColumn))
            .column(Column::new("name", TextColumn::new()))
            .column(Column::new("active", BooleanColumn).default_value(SqlValue::Int(1))),
    );
    schemas.register(
        TableSchema::new("books", "id")
            .column(Column::new("id", IntegerColumn))
            .column(Column::new("author_id", IntegerColumn))
            .column(Column::new("title", TextColumn::new())),
    );
    schemas.register(
        TableSchema::new("tags", "id")
            .column(Column::new("id", IntegerColumn))
            .column(Column::new("label", TextColumn::new())),
    );
    schemas.register(
        TableSchema::new("book_tags", "id")
            .column(Column::new("id", IntegerColumn))
            .column(Column::new("book_id", IntegerColumn))
            .column(Column::new("tag_id", IntegerColumn)),
    );
    schemas
}

fn context() -> Rc<Context> {
    Rc::new(Context::new(registry()))
}

fn context_with_bus() -> (Rc<Context>, Rc<NotificationBus>) {
    let bus = Rc::new(NotificationBus::new());
    let ctx = Rc::new(Context::with_bus(registry(), Rc::clone(&bus)));
    (ctx, bus)
}

fn author_row(id: i64, name: &str) -> Row {
    row(&[
        ("id", SqlValue::Int(id)),
        ("name", SqlValue::Text(name.to_string())),
        ("active", SqlValue::Int(1)),
    ])
}

fn book_row(id: i64, author_id: i64, title: &str) -> Row {
    row(&[
        ("id", SqlValue::Int(id)),
        ("author_id", SqlValue::Int(author_id)),
        ("title", SqlValue::Text(title.to_string())),
    ])
}

#[test]
fn identical_declarations_render_identically() {
    let ctx = context();
    let build = || {
        let mut q = FluentQuery::<Author>::new(&ctx).unwrap();
        q.and_where(Where::eq("active", true)).unwrap();
        q.order_by("name", OrderDirection::Asc).unwrap();
        q.take(10);
        q.render().unwrap()
    };
    assert_eq!(build(), build());
}

#[test]
fn default_select_qualifies_all_columns() {
    let ctx = context();
    let q = FluentQuery::<Author>::new(&ctx).unwrap();
    assert_eq!(
        q.render().unwrap(),
        "SELECT t1.id, t1.name, t1.active FROM authors t1"
    );
}

#[test]
fn in_and_not_in_render() {
    let ctx = context();
    let mut q = FluentQuery::<Author>::new(&ctx).unwrap();
    q.and_where(Where::any("name", vec!["a", "b"])).unwrap();
    assert!(q.render().unwrap().contains("t1.name IN ('a', 'b')"));

    let mut q = FluentQuery::<Author>::new(&ctx).unwrap();
    q.and_where(Where::none("name", vec!["a", "b"])).unwrap();
    assert!(q.render().unwrap().contains("t1.name NOT IN ('a', 'b')"));
}

#[test]
fn or_where_parenthesizes_the_added_branch() {
    let ctx = context();
    let mut q = FluentQuery::<Author>::new(&ctx).unwrap();
    q.and_where(Where::eq("id", 1)).unwrap();
    q.or_where(Where::eq("name", "x")).unwrap();
    assert!(q
        .render()
        .unwrap()
        .ends_with("WHERE t1.id = '1' OR (t1.name = 'x')"));
}

#[test]
fn scalars_are_quoted_after_storage_preparation() {
    let ctx = context();
    let mut q = FluentQuery::<Author>::new(&ctx).unwrap();
    q.and_where(Where::eq("active", true)).unwrap();
    assert!(q.render().unwrap().ends_with("WHERE t1.active = '1'"));
}

#[test]
fn paginate_renders_offset_count_and_reads_total() {
    let ctx = context();
    let driver = RecordingDriver::new();
    driver.push_rows(vec![author_row(1, "a")]);
    driver.set_found_rows(42);

    let mut q = FluentQuery::<Author>::new(&ctx).unwrap();
    q.paginate(3, 5);
    assert!(q.render().unwrap().ends_with("LIMIT 10, 5"));

    q.results(&driver).unwrap();
    assert_eq!(q.total(), Some(42));
    assert_eq!(driver.call_count(), 1);
}

#[test]
fn paginate_falls_back_to_a_count_query() {
    let ctx = context();
    let driver = RecordingDriver::new();
    driver.push_rows(vec![author_row(1, "a")]);
    driver.push_rows(vec![row(&[("COUNT(*)", SqlValue::Int(17))])]);

    let mut q = FluentQuery::<Author>::new(&ctx).unwrap();
    q.paginate(1, 5);
    q.results(&driver).unwrap();

    assert_eq!(q.total(), Some(17));
    assert_eq!(driver.call_count(), 2);
    assert!(driver.executed()[1].starts_with("SELECT COUNT(*) FROM authors t1"));
}

#[test]
fn deduped_pagination_total_counts_a_derived_table() {
    let ctx = context();
    let driver = RecordingDriver::new();
    driver.push_rows(vec![author_row(1, "a")]);
    driver.push_rows(vec![row(&[("COUNT(*)", SqlValue::Int(4))])]);

    let mut q = FluentQuery::<Author>::new(&ctx).unwrap();
    q.distinct();
    q.group_by("name").unwrap();
    q.paginate(1, 5);
    q.results(&driver).unwrap();

    assert_eq!(q.total(), Some(4));
    assert_eq!(
        driver.executed()[1],
        "SELECT COUNT(*) FROM (SELECT DISTINCT t1.id, t1.name, t1.active \
         FROM authors t1 GROUP BY t1.name) total"
    );
}

#[test]
fn results_are_memoized_until_state_changes() {
    let ctx = context();
    let driver = RecordingDriver::new();
    driver.push_rows(vec![author_row(1, "a")]);

    let mut q = FluentQuery::<Author>::new(&ctx).unwrap();
    q.results(&driver).unwrap();
    q.results(&driver).unwrap();
    assert_eq!(driver.call_count(), 1);

    q.take(5);
    driver.push_rows(vec![author_row(1, "a")]);
    q.results(&driver).unwrap();
    assert_eq!(driver.call_count(), 2);
}

#[test]
fn select_of_unknown_column_fails_before_any_driver_call() {
    let ctx = context();
    let driver = RecordingDriver::new();
    let mut q = FluentQuery::<Author>::new(&ctx).unwrap();

    let err = q.select(&["nope"]).unwrap_err();
    assert!(matches!(
        err,
        OrmError::Schema(SchemaError::InvalidColumn(_))
    ));
    assert_eq!(driver.call_count(), 0);
}

#[test]
fn where_on_unknown_alias_fails_at_declaration() {
    let ctx = context();
    let mut q = FluentQuery::<Author>::new(&ctx).unwrap();
    assert!(q.and_where(Where::eq("t9.name", "x")).is_err());
}

#[test]
fn find_renders_a_pk_lookup() {
    let ctx = context();
    let driver = RecordingDriver::new();
    driver.push_rows(vec![author_row(1, "a")]);

    let q = FluentQuery::<Author>::new(&ctx).unwrap();
    let found = q.find(&driver, 1).unwrap().unwrap();
    assert_eq!(found.id, Some(1));
    assert!(driver.executed()[0].ends_with("WHERE t1.id = '1'"));
}

#[test]
fn find_or_fail_on_shortfall() {
    let ctx = context();
    let driver = RecordingDriver::new();
    driver.push_rows(vec![author_row(1, "a"), author_row(2, "b")]);

    let q = FluentQuery::<Author>::new(&ctx).unwrap();
    let err = q
        .find_many_or_fail(
            &driver,
            vec![SqlValue::Int(1), SqlValue::Int(2), SqlValue::Int(3)],
        )
        .unwrap_err();
    assert!(matches!(err, OrmError::NotFound));

    driver.push_rows(vec![author_row(1, "a")]);
    let found = q.find_or_fail(&driver, 1).unwrap();
    assert_eq!(found.id, Some(1));
}

#[test]
fn first_or_create_saves_only_when_missing() {
    let ctx = context();
    let driver = RecordingDriver::new();
    // First lookup: present, no save
    driver.push_rows(vec![author_row(1, "known")]);

    let q = FluentQuery::<Author>::new(&ctx).unwrap();
    let attrs = [("name", SqlValue::Text(String::from("known")))];
    let existing = q.first_or_create(&driver, &attrs).unwrap();
    assert_eq!(existing.id, Some(1));
    assert_eq!(driver.call_count(), 1);

    // Second lookup: absent, insert runs and the new key lands back
    driver.push_rows(vec![]);
    driver.push_result(loam_orm::ExecResult {
        last_insert_id: Some(9),
        ..Default::default()
    });
    let attrs = [("name", SqlValue::Text(String::from("fresh")))];
    let created = q.first_or_create(&driver, &attrs).unwrap();
    assert_eq!(created.id, Some(9));
    assert!(driver.executed()[2].starts_with("INSERT INTO authors"));
}

#[test]
fn update_or_create_updates_an_existing_match() {
    let ctx = context();
    let driver = RecordingDriver::new();
    driver.push_rows(vec![author_row(1, "old")]);

    let q = FluentQuery::<Author>::new(&ctx).unwrap();
    let updated = q
        .update_or_create(
            &driver,
            &[("id", SqlValue::Int(1))],
            &[("name", SqlValue::Text(String::from("new")))],
        )
        .unwrap();
    assert_eq!(updated.name, "new");
    assert!(driver.executed()[1].starts_with("UPDATE authors SET"));
    assert!(driver.executed()[1].ends_with("WHERE id = '1'"));
}

#[test]
fn eager_has_many_issues_two_queries_total() {
    let ctx = context();
    let driver = RecordingDriver::new();
    driver.push_rows(vec![author_row(1, "a"), author_row(2, "b")]);
    driver.push_rows(vec![
        book_row(10, 1, "one"),
        book_row(11, 1, "two"),
    ]);

    let mut q = FluentQuery::<Author>::new(&ctx).unwrap();
    q.with("books", None);
    let authors = q.results(&driver).unwrap();

    assert_eq!(driver.call_count(), 2);
    assert!(driver.executed()[1].contains("t1.author_id IN ('1', '2')"));

    let first = authors.get_model(&SqlValue::Int(1)).unwrap();
    let second = authors.get_model(&SqlValue::Int(2)).unwrap();
    assert_eq!(first.books.as_ref().unwrap().len(), 2);
    assert!(second.books.as_ref().unwrap().is_empty());

    // Re-reading the loaded attribute and the memoized query costs nothing
    q.results(&driver).unwrap();
    assert_eq!(driver.call_count(), 2);
}

#[test]
fn unknown_relation_path_is_reported() {
    let ctx = context();
    let driver = RecordingDriver::new();
    driver.push_rows(vec![author_row(1, "a")]);

    let mut q = FluentQuery::<Author>::new(&ctx).unwrap();
    q.with("pets", None);
    let err = q.results(&driver).unwrap_err();
    assert!(matches!(err, OrmError::UnknownRelation(name) if name == "pets"));
}

#[test]
fn has_many_get_results_queries_once_then_reuses() {
    let ctx = context();
    let driver = RecordingDriver::new();
    driver.push_rows(vec![book_row(10, 1, "one")]);

    let author = Author {
        id: Some(1),
        name: String::from("a"),
        active: true,
        books: None,
    };
    let template = HasMany::<Author, Book>::new(&ctx, "author_id").unwrap();
    let mut relation = template.for_parent(&author);

    assert_eq!(relation.get_results(&driver).unwrap().len(), 1);
    assert_eq!(relation.get_results(&driver).unwrap().len(), 1);
    assert_eq!(driver.call_count(), 1);
    assert!(driver.executed()[0].ends_with("WHERE t1.author_id = '1'"));
}

#[test]
fn unbound_relation_is_an_error() {
    let ctx = context();
    let driver = RecordingDriver::new();
    let mut template = HasMany::<Author, Book>::new(&ctx, "author_id").unwrap();
    assert!(matches!(
        template.get_results(&driver).unwrap_err(),
        OrmError::UnboundRelation
    ));
    assert_eq!(driver.call_count(), 0);
}

#[test]
fn restrict_policy_blocks_delete_while_dependents_exist() {
    let ctx = context();
    let driver = RecordingDriver::new();
    driver.push_rows(vec![row(&[("COUNT(*)", SqlValue::Int(2))])]);

    let author = Author {
        id: Some(1),
        name: String::from("a"),
        active: true,
        books: None,
    };
    let relation = HasMany::<Author, Book>::new(&ctx, "author_id").unwrap();
    let err = relation.on_delete(&driver, &author).unwrap_err();
    assert!(matches!(err, OrmError::DeleteRestricted { table } if table == "books"));
}

#[test]
fn cascade_policy_deletes_dependents() {
    let ctx = context();
    let driver = RecordingDriver::new();

    let author = Author {
        id: Some(1),
        name: String::from("a"),
        active: true,
        books: None,
    };
    let relation = HasMany::<Author, Book>::new(&ctx, "author_id")
        .unwrap()
        .on_delete_policy(loam_orm::DeletePolicy::Cascade);
    relation.on_delete(&driver, &author).unwrap();
    assert_eq!(
        driver.executed(),
        vec!["DELETE FROM books WHERE author_id = '1'"]
    );
}

#[test]
fn has_one_resolves_to_the_first_row_or_none() {
    let ctx = context();
    let driver = RecordingDriver::new();
    driver.push_rows(vec![]);

    let author = Author {
        id: Some(1),
        name: String::from("a"),
        active: true,
        books: None,
    };
    let template = HasOne::<Author, Book>::new(&ctx, "author_id").unwrap();
    let mut relation = template.for_parent(&author);

    assert!(relation.get_result(&driver).unwrap().is_none());
    assert!(driver.executed()[0].ends_with("WHERE t1.author_id = '1'"));

    // The empty fetch is cached like a present one
    assert!(relation.get_result(&driver).unwrap().is_none());
    assert_eq!(driver.call_count(), 1);
}

#[test]
fn has_one_eager_load_keeps_one_row_per_parent() {
    let ctx = context();
    let driver = RecordingDriver::new();
    driver.push_rows(vec![book_row(10, 1, "first"), book_row(11, 1, "second")]);

    let template = HasOne::<Author, Book>::new(&ctx, "author_id").unwrap();
    let loaded = template
        .eager_load(
            &driver,
            &[SqlValue::Int(1), SqlValue::Int(2)],
            &loam_orm::no_customize(),
        )
        .unwrap();

    assert_eq!(driver.call_count(), 1);
    assert_eq!(loaded.get("1").unwrap().id, Some(10));
    assert!(!loaded.contains_key("2"));
}

#[test]
fn has_foreign_point_lookup_reuses_the_fetch() {
    let ctx = context();
    let driver = RecordingDriver::new();
    driver.push_rows(vec![author_row(1, "a")]);

    let book = Book {
        id: Some(10),
        author_id: Some(1),
        title: String::from("t"),
    };
    let template =
        HasForeign::<Book, Author, _>::new(&ctx, "author_id", EntitySaver::<Author>::new())
            .unwrap();
    let mut relation = template.for_parent(&book);

    let found = relation.get_result(&driver).unwrap().unwrap();
    assert_eq!(found.id, Some(1));
    assert!(driver.executed()[0].ends_with("WHERE t1.id = '1'"));

    relation.get_result(&driver).unwrap();
    assert_eq!(driver.call_count(), 1);
}

#[test]
fn has_foreign_null_key_resolves_without_the_driver() {
    let ctx = context();
    let driver = RecordingDriver::new();

    let book = Book {
        id: Some(10),
        author_id: None,
        title: String::from("t"),
    };
    let template =
        HasForeign::<Book, Author, _>::new(&ctx, "author_id", EntitySaver::<Author>::new())
            .unwrap();
    let mut relation = template.for_parent(&book);

    assert!(relation.get_result(&driver).unwrap().is_none());
    assert_eq!(driver.call_count(), 0);
}

#[test]
fn has_foreign_eager_load_batches_distinct_keys() {
    let ctx = context();
    let driver = RecordingDriver::new();
    driver.push_rows(vec![author_row(1, "a"), author_row(2, "b")]);

    let books = [
        Book {
            id: Some(10),
            author_id: Some(1),
            title: String::from("x"),
        },
        Book {
            id: Some(11),
            author_id: Some(1),
            title: String::from("y"),
        },
        Book {
            id: Some(12),
            author_id: Some(2),
            title: String::from("z"),
        },
    ];
    let template =
        HasForeign::<Book, Author, _>::new(&ctx, "author_id", EntitySaver::<Author>::new())
            .unwrap();
    let parents: Vec<&Book> = books.iter().collect();
    let loaded = template
        .eager_load(&driver, &parents, &loam_orm::no_customize())
        .unwrap();

    // The duplicated key collapses into one IN lookup
    assert_eq!(driver.call_count(), 1);
    assert!(driver.executed()[0].contains("t1.id IN ('1', '2')"));
    assert_eq!(loaded.get("1").unwrap().name, "a");
    assert_eq!(loaded.get("2").unwrap().name, "b");
}

#[test]
fn has_foreign_persist_saves_and_returns_the_key() {
    let ctx = context();
    let driver = RecordingDriver::new();

    let template =
        HasForeign::<Book, Author, _>::new(&ctx, "author_id", EntitySaver::<Author>::new())
            .unwrap();
    let mut author = Author {
        id: Some(5),
        name: String::from("a"),
        active: true,
        books: None,
    };
    let key = template.persist(&driver, &mut author).unwrap();

    assert_eq!(key, Some(SqlValue::Int(5)));
    assert!(driver.executed()[0].starts_with("UPDATE authors SET"));
}

#[test]
fn many_to_many_fetch_joins_the_association() {
    let ctx = context();
    let driver = RecordingDriver::new();
    driver.push_rows(vec![row(&[
        ("id", SqlValue::Int(3)),
        ("label", SqlValue::Text(String::from("noir"))),
    ])]);

    let book = Book {
        id: Some(10),
        author_id: Some(1),
        title: String::from("t"),
    };
    let template = ManyToMany::<Book, Tag>::new(&ctx, "book_tags", "book_id", "tag_id").unwrap();
    let mut relation = template.for_parent(&book);
    let tags = relation.get_results(&driver).unwrap();

    assert_eq!(tags.borrow().len(), 1);
    let sql = &driver.executed()[0];
    assert!(sql.starts_with("SELECT DISTINCT t1.id, t1.label FROM tags t1"));
    assert!(sql.contains("INNER JOIN book_tags t2 ON (t1.id = t2.tag_id AND (t2.book_id = '10'))"));
}

#[test]
fn many_to_many_persist_is_one_delete_plus_one_insert() {
    let ctx = context();
    let driver = RecordingDriver::new();

    let book = Book {
        id: Some(10),
        author_id: Some(1),
        title: String::from("t"),
    };
    let template = ManyToMany::<Book, Tag>::new(&ctx, "book_tags", "book_id", "tag_id").unwrap();
    let mut relation = template.for_parent(&book);

    let mut fetched = Tag::collection();
    fetched.push(Tag {
        id: Some(1),
        label: String::from("old"),
    });
    relation.prime(fetched);

    let handle = relation.get_results(&driver).unwrap();
    {
        let mut tags = handle.borrow_mut();
        tags.push(Tag {
            id: Some(2),
            label: String::from("new"),
        });
        tags.push(Tag {
            id: Some(3),
            label: String::from("newer"),
        });
        tags.remove_model(&SqlValue::Int(1));
    }
    relation.persist(&driver).unwrap();

    assert_eq!(
        driver.executed(),
        vec![
            "DELETE FROM book_tags WHERE book_id = '10' AND tag_id IN ('1')",
            "INSERT IGNORE INTO book_tags (book_id, tag_id) VALUES ('10', '2'), ('10', '3')",
        ]
    );

    // Deltas are consumed: a second persist writes nothing
    relation.persist(&driver).unwrap();
    assert_eq!(driver.call_count(), 2);
}

#[test]
fn many_to_many_eager_load_groups_by_parent() {
    let ctx = context();
    let driver = RecordingDriver::new();
    let mut tagged = row(&[
        ("id", SqlValue::Int(3)),
        ("label", SqlValue::Text(String::from("noir"))),
    ]);
    tagged.insert(String::from("__parent_pk"), SqlValue::Int(10));
    driver.push_rows(vec![tagged]);

    let template = ManyToMany::<Book, Tag>::new(&ctx, "book_tags", "book_id", "tag_id").unwrap();
    let grouped = template
        .eager_load(
            &driver,
            &[SqlValue::Int(10), SqlValue::Int(11)],
            &loam_orm::no_customize(),
        )
        .unwrap();

    assert_eq!(driver.call_count(), 1);
    let sql = &driver.executed()[0];
    assert!(sql.contains("LEFT JOIN book_tags t2"));
    assert!(sql.contains("t2.book_id IN ('10', '11')"));
    assert!(sql.contains("t2.book_id AS __parent_pk"));

    assert_eq!(grouped.get("10").unwrap().len(), 1);
    assert!(!grouped.contains_key("11"));
}

#[test]
fn keep_synced_mirrors_bus_events_without_recording_deltas() {
    let (ctx, bus) = context_with_bus();
    let driver = RecordingDriver::new();

    let book = Book {
        id: Some(10),
        author_id: Some(1),
        title: String::from("t"),
    };
    let template = ManyToMany::<Book, Tag>::new(&ctx, "book_tags", "book_id", "tag_id").unwrap();
    let mut relation = template.for_parent(&book);
    relation.prime(Tag::collection());
    let handle = relation.get_results(&driver).unwrap();
    relation.keep_synced().unwrap();

    let subject = Tag {
        id: Some(3),
        label: String::from("noir"),
    };
    bus.fire(
        "tags",
        &Notification::Saved {
            subject: Rc::new(subject),
            pk: SqlValue::Int(3),
            changed: Vec::new(),
            attached: HashMap::from([(String::from("book_tags"), vec![SqlValue::Int(10)])]),
            detached: HashMap::new(),
        },
    );
    assert_eq!(handle.borrow().len(), 1);
    assert!(handle.borrow().get_added().is_empty());

    bus.fire("tags", &Notification::Deleted { pk: SqlValue::Int(3) });
    assert!(handle.borrow().is_empty());
    assert!(handle.borrow().get_removed().is_empty());
    assert_eq!(driver.call_count(), 0);
}

#[test]
fn dropping_a_synced_relation_unsubscribes() {
    let (ctx, bus) = context_with_bus();
    let driver = RecordingDriver::new();
    let hits = Rc::new(Cell::new(0));

    let book = Book {
        id: Some(10),
        author_id: Some(1),
        title: String::from("t"),
    };
    {
        let template =
            ManyToMany::<Book, Tag>::new(&ctx, "book_tags", "book_id", "tag_id").unwrap();
        let mut relation = template.for_parent(&book);
        relation.prime(Tag::collection());
        relation.get_results(&driver).unwrap();
        relation.keep_synced().unwrap();
    }

    let h = Rc::clone(&hits);
    bus.subscribe("tags", EventKind::Deleted, move |_| h.set(h.get() + 1));
    bus.fire("tags", &Notification::Deleted { pk: SqlValue::Int(3) });
    assert_eq!(hits.get(), 1);
}

#[test]
fn save_entity_inserts_and_backfills_the_key() {
    let (ctx, bus) = context_with_bus();
    let driver = RecordingDriver::new();
    driver.push_result(loam_orm::ExecResult {
        last_insert_id: Some(7),
        ..Default::default()
    });

    let saved_pks = Rc::new(std::cell::RefCell::new(Vec::new()));
    let sink = Rc::clone(&saved_pks);
    bus.subscribe("authors", EventKind::Saved, move |n| {
        if let Notification::Saved { pk, .. } = n {
            sink.borrow_mut().push(pk.clone());
        }
    });

    let mut author = Author {
        id: None,
        name: String::from("fresh"),
        active: true,
        books: None,
    };
    save_entity(&ctx, &driver, &mut author).unwrap();

    assert_eq!(author.id, Some(7));
    let sql = &driver.executed()[0];
    assert!(sql.starts_with("INSERT INTO authors"));
    assert!(!sql.contains("id"), "null pk must be omitted: {sql}");
    assert_eq!(saved_pks.borrow().as_slice(), &[SqlValue::Int(7)]);
}

#[test]
fn save_entity_updates_when_a_key_exists() {
    let ctx = context();
    let driver = RecordingDriver::new();

    let mut author = Author {
        id: Some(7),
        name: String::from("renamed"),
        active: false,
        books: None,
    };
    save_entity(&ctx, &driver, &mut author).unwrap();

    let sql = &driver.executed()[0];
    assert!(sql.starts_with("UPDATE authors SET"));
    assert!(sql.ends_with("WHERE id = '7'"));
    assert!(sql.contains("name = 'renamed'"));
    assert!(sql.contains("active = '0'"));
}
