//! Postgres command generation.
//!
//! Pure functions from a [`Mapping`] (plus filters or paging arguments)
//! to [`Command`]s and [`Batch`]es. Nothing here performs I/O; the
//! session executes what this module produces. Command text that is a
//! pure function of mapping state (select-all, select-any, insert,
//! update, delete, relation loads) is memoized set-once on the mapping.

use crate::batch::{Batch, Command, CommandKind};
use crate::error::{OrmError, OrmResult};
use crate::filter::Filter;
use crate::mapping::{CommandSlot, Mapping, Relation};
use crate::param::ParamList;
use crate::value::Value;
use std::any::Any;

/// One side of a join table: the base table and its ID column.
#[derive(Clone, Copy, Debug)]
pub struct JoinSide<'a> {
    pub table: &'a str,
    pub id_field: &'a str,
}

impl<'a> JoinSide<'a> {
    pub fn of(mapping: &'a Mapping) -> OrmResult<Self> {
        let id = mapping.primary_id()?;
        Ok(Self {
            table: &mapping.table_name,
            id_field: &id.field_name,
        })
    }
}

/// The join-table columns for a relation, in statement order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct JoinColumns {
    /// Column holding the owning side's key.
    pub owner: String,
    /// Column holding the related side's key.
    pub foreign: String,
    /// Owner column renders before the foreign column in column lists.
    pub owner_first: bool,
}

impl JoinColumns {
    /// Columns in statement order.
    pub fn ordered(&self) -> (&str, &str) {
        if self.owner_first {
            (&self.owner, &self.foreign)
        } else {
            (&self.foreign, &self.owner)
        }
    }
}

/// The join-column naming rule.
///
/// Each side's column is named `{table}_{id_field}`. Statement order is
/// decided by lexicographic comparison of the two table names. When both
/// sides share one table (a self-referencing relation) the second
/// occurrence is suffixed with `2` and the owner column renders first.
/// Every join-table statement (insert, delete, load) must route through
/// here; diverging orderings would silently target the wrong column.
pub fn join_columns(owner: JoinSide<'_>, foreign: JoinSide<'_>) -> JoinColumns {
    let owner_col = format!("{}_{}", owner.table, owner.id_field);
    if owner.table == foreign.table {
        return JoinColumns {
            foreign: format!("{}_{}2", foreign.table, foreign.id_field),
            owner: owner_col,
            owner_first: true,
        };
    }
    JoinColumns {
        foreign: format!("{}_{}", foreign.table, foreign.id_field),
        owner_first: owner.table <= foreign.table,
        owner: owner_col,
    }
}

fn render_where(filters: &[Filter], params: &mut ParamList) -> String {
    if filters.is_empty() {
        return String::new();
    }
    format!(" WHERE {}", Filter::render_all(filters, params))
}

fn select_base(mapping: &Mapping) -> String {
    format!(
        "SELECT {} FROM {}",
        mapping.select_columns().join(", "),
        mapping.table_name
    )
}

fn id_where(mapping: &Mapping, params: &mut ParamList, values: Vec<Value>) -> String {
    let clauses: Vec<String> = mapping
        .id_properties
        .iter()
        .zip(values)
        .map(|(id, value)| format!("{} = ${}", id.field_name, params.push(value)))
        .collect();
    clauses.join(" AND ")
}

/// Columns written by INSERT and UPDATE: writable scalars plus
/// caller-assigned IDs. Auto-increment IDs are never supplied.
fn write_columns(mapping: &Mapping) -> Vec<&str> {
    let mut cols: Vec<&str> = mapping
        .properties
        .iter()
        .filter(|p| p.mode.writable())
        .map(|p| p.field_name.as_str())
        .collect();
    cols.extend(
        mapping
            .id_properties
            .iter()
            .filter(|id| !id.auto_increment)
            .map(|id| id.field_name.as_str()),
    );
    cols
}

fn write_values(mapping: &Mapping, obj: &dyn Any) -> OrmResult<ParamList> {
    let mut values = ParamList::new();
    for prop in mapping.properties.iter().filter(|p| p.mode.writable()) {
        values.push(prop.value(obj)?);
    }
    for id in mapping.id_properties.iter().filter(|id| !id.auto_increment) {
        values.push(id.value(obj)?);
    }
    Ok(values)
}

fn insert_text(mapping: &Mapping) -> String {
    let cols = write_columns(mapping);
    let binds: Vec<String> = (1..=cols.len()).map(|n| format!("${}", n)).collect();
    let mut sql = format!(
        "INSERT INTO {} ({}) VALUES ({})",
        mapping.table_name,
        cols.join(", "),
        binds.join(", ")
    );
    // Identity retrieval: the executor reads the generated key back.
    if let Some(auto) = mapping.id_properties.iter().find(|id| id.auto_increment) {
        sql.push_str(&format!(
            " RETURNING {} AS {}",
            auto.field_name, auto.field_name
        ));
    }
    sql
}

fn update_text(mapping: &Mapping) -> String {
    let cols = write_columns(mapping);
    let sets: Vec<String> = cols
        .iter()
        .enumerate()
        .map(|(i, col)| format!("{} = ${}", col, i + 1))
        .collect();
    let wheres: Vec<String> = mapping
        .id_properties
        .iter()
        .enumerate()
        .map(|(i, id)| format!("{} = ${}", id.field_name, cols.len() + i + 1))
        .collect();
    format!(
        "UPDATE {} SET {} WHERE {}",
        mapping.table_name,
        sets.join(", "),
        wheres.join(" AND ")
    )
}

fn delete_text(mapping: &Mapping) -> String {
    let wheres: Vec<String> = mapping
        .id_properties
        .iter()
        .enumerate()
        .map(|(i, id)| format!("{} = ${}", id.field_name, i + 1))
        .collect();
    format!(
        "DELETE FROM {} WHERE {}",
        mapping.table_name,
        wheres.join(" AND ")
    )
}

/// Derive the five memoized commands for a mapping. Idempotent; a second
/// call changes nothing and yields byte-identical text.
pub fn setup_commands(mapping: &Mapping) {
    mapping.memoize(CommandSlot::SelectAll, || {
        Command::text(select_base(mapping), ParamList::new())
    });
    mapping.memoize(CommandSlot::SelectAny, || {
        Command::text(format!("{} LIMIT 1", select_base(mapping)), ParamList::new())
    });
    mapping.memoize(CommandSlot::Insert, || {
        Command::text(insert_text(mapping), ParamList::new())
    });
    mapping.memoize(CommandSlot::Update, || {
        Command::text(update_text(mapping), ParamList::new())
    });
    mapping.memoize(CommandSlot::Delete, || {
        Command::text(delete_text(mapping), ParamList::new())
    });
}

/// SELECT of every mapped row, optionally filtered.
///
/// Without filters this is the memoized command (possibly authored, even
/// a stored procedure). Filters force plain text since a WHERE fragment
/// cannot be injected into a procedure call.
pub fn select_all(mapping: &Mapping, filters: &[Filter]) -> Command {
    let memoized = mapping.memoize(CommandSlot::SelectAll, || {
        Command::text(select_base(mapping), ParamList::new())
    });
    if filters.is_empty() {
        return memoized.clone();
    }
    let base = match memoized.kind {
        CommandKind::Text => memoized.sql.clone(),
        CommandKind::StoredProcedure => select_base(mapping),
    };
    let mut params = ParamList::new();
    let where_sql = render_where(filters, &mut params);
    Command::text(format!("{}{}", base, where_sql), params)
}

/// SELECT limited to the first `limit` rows.
pub fn select_all_limited(mapping: &Mapping, limit: u64, filters: &[Filter]) -> Command {
    let mut params = ParamList::new();
    let where_sql = render_where(filters, &mut params);
    Command::text(
        format!("{}{} LIMIT {}", select_base(mapping), where_sql, limit),
        params,
    )
}

/// SELECT of at most one row.
///
/// Filtered calls always regenerate from the column list, even when the
/// slot holds authored text: the trailing `LIMIT 1` must come after the
/// WHERE fragment, and authored text may already carry its own limit.
pub fn select_any(mapping: &Mapping, filters: &[Filter]) -> Command {
    let memoized = mapping.memoize(CommandSlot::SelectAny, || {
        Command::text(format!("{} LIMIT 1", select_base(mapping)), ParamList::new())
    });
    if filters.is_empty() {
        return memoized.clone();
    }
    let mut params = ParamList::new();
    let where_sql = render_where(filters, &mut params);
    Command::text(
        format!("{}{} LIMIT 1", select_base(mapping), where_sql),
        params,
    )
}

/// INSERT for one object; auto-increment keys come back via RETURNING.
pub fn insert(mapping: &Mapping, obj: &dyn Any) -> OrmResult<Command> {
    let command = mapping
        .memoize(CommandSlot::Insert, || {
            Command::text(insert_text(mapping), ParamList::new())
        })
        .with_params(write_values(mapping, obj)?);
    Ok(command)
}

/// UPDATE for one object, keyed by its ID properties.
pub fn update(mapping: &Mapping, obj: &dyn Any) -> OrmResult<Command> {
    let mut values = write_values(mapping, obj)?;
    for id_value in mapping.id_values(obj)? {
        values.push(id_value);
    }
    let command = mapping
        .memoize(CommandSlot::Update, || {
            Command::text(update_text(mapping), ParamList::new())
        })
        .with_params(values);
    Ok(command)
}

/// DELETE of one row by ID values.
pub fn delete(mapping: &Mapping, id_values: Vec<Value>) -> OrmResult<Command> {
    if id_values.len() != mapping.id_properties.len() {
        return Err(OrmError::mapping(format!(
            "{}: delete expects {} ID value(s), got {}",
            mapping.type_name(),
            mapping.id_properties.len(),
            id_values.len()
        )));
    }
    let command = mapping
        .memoize(CommandSlot::Delete, || {
            Command::text(delete_text(mapping), ParamList::new())
        })
        .with_params(id_values.into());
    Ok(command)
}

/// Existence probe by ID values, for the natural-key save decision.
pub fn exists_by_id(mapping: &Mapping, id_values: Vec<Value>) -> Command {
    let mut params = ParamList::new();
    let where_sql = id_where(mapping, &mut params, id_values);
    Command::text(
        format!(
            "SELECT EXISTS(SELECT 1 FROM {} WHERE {}) AS present",
            mapping.table_name, where_sql
        ),
        params,
    )
}

/// COUNT of matching rows, wrapped so the inner select stays reusable.
/// The caller computes `ceil(total / page_size)`.
pub fn page_count(mapping: &Mapping, filters: &[Filter]) -> Command {
    let id_cols: Vec<&str> = mapping
        .id_properties
        .iter()
        .map(|id| id.field_name.as_str())
        .collect();
    let mut params = ParamList::new();
    let where_sql = render_where(filters, &mut params);
    Command::text(
        format!(
            "SELECT COUNT(*) AS total FROM (SELECT {} FROM {}{}) AS query",
            id_cols.join(", "),
            mapping.table_name,
            where_sql
        ),
        params,
    )
}

/// One page of an ordered result set. `current_page` counts from zero.
pub fn paged(
    mapping: &Mapping,
    page_size: u64,
    current_page: u64,
    order_by: Option<&str>,
    filters: &[Filter],
) -> Command {
    let order = match order_by {
        Some(cols) if !cols.is_empty() => cols.to_string(),
        _ => mapping
            .id_properties
            .iter()
            .map(|id| id.field_name.as_str())
            .collect::<Vec<_>>()
            .join(", "),
    };
    let mut params = ParamList::new();
    let where_sql = render_where(filters, &mut params);
    Command::text(
        format!(
            "{}{} ORDER BY {} LIMIT {} OFFSET {}",
            select_base(mapping),
            where_sql,
            order,
            page_size,
            current_page.saturating_mul(page_size)
        ),
        params,
    )
}

/// Join-table INSERTs for one owner's current related keys.
pub fn joins_save(
    owner: &Mapping,
    relation: &Relation,
    foreign: &Mapping,
    owner_key: Value,
    related_keys: Vec<Value>,
) -> OrmResult<Batch> {
    let cols = join_columns(JoinSide::of(owner)?, JoinSide::of(foreign)?);
    let (first, second) = cols.ordered();
    let sql = format!(
        "INSERT INTO {} ({}, {}) VALUES ($1, $2)",
        relation.table_name, first, second
    );

    let mut batch = Batch::new();
    for key in related_keys {
        let params = if cols.owner_first {
            vec![owner_key.clone(), key]
        } else {
            vec![key, owner_key.clone()]
        };
        batch.add_command(Command::text(&sql, params.into()));
    }
    Ok(batch)
}

/// Join-table DELETE clearing every row for one owner.
pub fn joins_delete(
    owner: &Mapping,
    relation: &Relation,
    foreign: &Mapping,
    owner_key: Value,
) -> OrmResult<Command> {
    let cols = join_columns(JoinSide::of(owner)?, JoinSide::of(foreign)?);
    Ok(Command::text(
        format!(
            "DELETE FROM {} WHERE {} = $1",
            relation.table_name, cols.owner
        ),
        vec![owner_key].into(),
    ))
}

/// The relation's lazy-load SELECT, memoized set-once on the relation.
pub fn load_command(
    owner: &Mapping,
    relation: &Relation,
    foreign: &Mapping,
) -> OrmResult<Command> {
    let cols = join_columns(JoinSide::of(owner)?, JoinSide::of(foreign)?);
    let foreign_id = foreign.primary_id()?;
    let select_cols: Vec<String> = foreign
        .select_columns()
        .iter()
        .map(|c| format!("f.{}", c))
        .collect();
    let command = relation.memoize_load(|| {
        Command::text(
            format!(
                "SELECT {} FROM {} f INNER JOIN {} j ON f.{} = j.{} WHERE j.{} = $1",
                select_cols.join(", "),
                foreign.table_name,
                relation.table_name,
                foreign_id.field_name,
                cols.foreign,
                cols.owner
            ),
            ParamList::new(),
        )
    });
    Ok(command.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapping::MappingBuilder;

    #[derive(Default)]
    struct Person {
        id: i64,
        name: String,
        age: i64,
        friends: Vec<Person>,
    }

    fn person_mapping() -> Mapping {
        MappingBuilder::<Person>::new("people")
            .auto_id("id", "id", |p| p.id, |p, v| p.id = v)
            .map("name", "name", |p| p.name.clone(), |p, v| p.name = v)
            .map("age", "age", |p| p.age, |p, v| p.age = v)
            .many_to_many::<Person>(
                "friends",
                "people_people",
                false,
                |p| p.friends.iter().collect(),
                |p| p.friends.iter_mut().collect(),
                |f| Value::Int(f.id),
            )
            .build()
            .unwrap()
    }

    #[derive(Default)]
    struct Document {
        key: String,
        title: String,
    }

    fn document_mapping() -> Mapping {
        MappingBuilder::<Document>::new("documents")
            .id("key", "doc_key", |d| d.key.clone(), |d, v| d.key = v)
            .map("title", "title", |d| d.title.clone(), |d, v| d.title = v)
            .build()
            .unwrap()
    }

    #[test]
    fn select_all_memoizes_and_filters_append_where() {
        let mapping = person_mapping();
        let plain = select_all(&mapping, &[]);
        assert_eq!(plain.sql, "SELECT id, name, age FROM people");
        assert!(plain.params.is_empty());

        let filtered = select_all(&mapping, &[Filter::gte("age", 18)]);
        assert_eq!(
            filtered.sql,
            "SELECT id, name, age FROM people WHERE age >= $1"
        );
        assert_eq!(filtered.params.values(), vec![Value::Int(18)]);
        assert_eq!(filtered.kind, CommandKind::Text);
    }

    #[test]
    fn select_any_appends_limit_one() {
        let mapping = person_mapping();
        assert_eq!(
            select_any(&mapping, &[]).sql,
            "SELECT id, name, age FROM people LIMIT 1"
        );
        assert_eq!(
            select_any(&mapping, &[Filter::eq("id", 3)]).sql,
            "SELECT id, name, age FROM people WHERE id = $1 LIMIT 1"
        );
    }

    #[test]
    fn filtered_select_any_regenerates_over_authored_text() {
        let mapping = MappingBuilder::<Person>::new("people")
            .auto_id("id", "id", |p| p.id, |p, v| p.id = v)
            .with_command(
                CommandSlot::SelectAny,
                "SELECT id FROM people ORDER BY id LIMIT 1",
                CommandKind::Text,
            )
            .build()
            .unwrap();

        // Unfiltered, the authored text is served as-is.
        assert_eq!(
            select_any(&mapping, &[]).sql,
            "SELECT id FROM people ORDER BY id LIMIT 1"
        );
        // Filtered, the command is rebuilt from the column list so the
        // WHERE lands before a single trailing LIMIT 1.
        let filtered = select_any(&mapping, &[Filter::eq("id", 3)]);
        assert_eq!(filtered.sql, "SELECT id FROM people WHERE id = $1 LIMIT 1");
        assert_eq!(filtered.params.values(), vec![Value::Int(3)]);
    }

    #[test]
    fn filters_on_stored_procedure_fall_back_to_text() {
        let mapping = MappingBuilder::<Person>::new("people")
            .auto_id("id", "id", |p| p.id, |p, v| p.id = v)
            .with_command(
                CommandSlot::SelectAll,
                "CALL all_people()",
                CommandKind::StoredProcedure,
            )
            .build()
            .unwrap();

        assert_eq!(select_all(&mapping, &[]).sql, "CALL all_people()");
        let filtered = select_all(&mapping, &[Filter::eq("id", 1)]);
        assert_eq!(filtered.sql, "SELECT id FROM people WHERE id = $1");
        assert_eq!(filtered.kind, CommandKind::Text);
    }

    #[test]
    fn insert_skips_auto_id_and_returns_key() {
        let mapping = person_mapping();
        let person = Person {
            id: 0,
            name: "Ada".into(),
            age: 36,
            friends: Vec::new(),
        };
        let command = insert(&mapping, &person).unwrap();
        assert_eq!(
            command.sql,
            "INSERT INTO people (name, age) VALUES ($1, $2) RETURNING id AS id"
        );
        assert_eq!(
            command.params.values(),
            vec![Value::Text("Ada".into()), Value::Int(36)]
        );
    }

    #[test]
    fn insert_includes_natural_key() {
        let mapping = document_mapping();
        let doc = Document {
            key: "k1".into(),
            title: "T".into(),
        };
        let command = insert(&mapping, &doc).unwrap();
        assert_eq!(
            command.sql,
            "INSERT INTO documents (title, doc_key) VALUES ($1, $2)"
        );
        assert_eq!(
            command.params.values(),
            vec![Value::Text("T".into()), Value::Text("k1".into())]
        );
    }

    #[test]
    fn update_sets_columns_and_keys_on_ids() {
        let mapping = person_mapping();
        let person = Person {
            id: 9,
            name: "Ada".into(),
            age: 37,
            friends: Vec::new(),
        };
        let command = update(&mapping, &person).unwrap();
        assert_eq!(
            command.sql,
            "UPDATE people SET name = $1, age = $2 WHERE id = $3"
        );
        assert_eq!(
            command.params.values(),
            vec![Value::Text("Ada".into()), Value::Int(37), Value::Int(9)]
        );
    }

    #[test]
    fn delete_by_id_values() {
        let mapping = person_mapping();
        let command = delete(&mapping, vec![Value::Int(9)]).unwrap();
        assert_eq!(command.sql, "DELETE FROM people WHERE id = $1");
        assert_eq!(command.params.values(), vec![Value::Int(9)]);

        assert!(delete(&mapping, vec![]).is_err());
    }

    #[test]
    fn exists_probe_shape() {
        let mapping = document_mapping();
        let command = exists_by_id(&mapping, vec![Value::Text("k1".into())]);
        assert_eq!(
            command.sql,
            "SELECT EXISTS(SELECT 1 FROM documents WHERE doc_key = $1) AS present"
        );
    }

    #[test]
    fn page_count_wraps_id_select() {
        let mapping = person_mapping();
        let command = page_count(&mapping, &[Filter::gt("age", 20)]);
        assert_eq!(
            command.sql,
            "SELECT COUNT(*) AS total FROM (SELECT id FROM people WHERE age > $1) AS query"
        );
    }

    #[test]
    fn paged_windows_by_limit_offset() {
        let mapping = person_mapping();
        let command = paged(&mapping, 25, 4, None, &[]);
        assert_eq!(
            command.sql,
            "SELECT id, name, age FROM people ORDER BY id LIMIT 25 OFFSET 100"
        );

        let ordered = paged(&mapping, 10, 0, Some("name"), &[]);
        assert!(ordered.sql.ends_with("ORDER BY name LIMIT 10 OFFSET 0"));
    }

    #[test]
    fn join_columns_order_lexicographically() {
        let owner = JoinSide {
            table: "people",
            id_field: "id",
        };
        let foreign = JoinSide {
            table: "groups",
            id_field: "id",
        };
        let cols = join_columns(owner, foreign);
        assert_eq!(cols.owner, "people_id");
        assert_eq!(cols.foreign, "groups_id");
        assert_eq!(cols.ordered(), ("groups_id", "people_id"));
    }

    #[test]
    fn self_reference_suffixes_second_column() {
        let side = JoinSide {
            table: "people",
            id_field: "id",
        };
        let cols = join_columns(side, side);
        assert_eq!(cols.owner, "people_id");
        assert_eq!(cols.foreign, "people_id2");
        assert_eq!(cols.ordered(), ("people_id", "people_id2"));
    }

    #[test]
    fn self_join_save_and_delete_agree_on_columns() {
        let mapping = person_mapping();
        let relation = mapping.relation("friends").unwrap();

        let batch = joins_save(
            &mapping,
            relation,
            &mapping,
            Value::Int(1),
            vec![Value::Int(2)],
        )
        .unwrap();
        assert_eq!(batch.len(), 1);
        let command = &batch.commands()[0];
        assert_eq!(
            command.sql,
            "INSERT INTO people_people (people_id, people_id2) VALUES ($1, $2)"
        );
        assert_eq!(command.params.values(), vec![Value::Int(1), Value::Int(2)]);

        let clear = joins_delete(&mapping, relation, &mapping, Value::Int(1)).unwrap();
        assert_eq!(clear.sql, "DELETE FROM people_people WHERE people_id = $1");
    }

    #[test]
    fn load_command_joins_through_the_join_table() {
        let mapping = person_mapping();
        let relation = mapping.relation("friends").unwrap();
        let command = load_command(&mapping, relation, &mapping).unwrap();
        assert_eq!(
            command.sql,
            "SELECT f.id, f.name, f.age FROM people f INNER JOIN people_people j \
             ON f.id = j.people_id2 WHERE j.people_id = $1"
        );
        // Memoized set-once.
        let again = load_command(&mapping, relation, &mapping).unwrap();
        assert_eq!(again.sql, command.sql);
    }

    #[test]
    fn setup_commands_is_idempotent() {
        let mapping = person_mapping();
        setup_commands(&mapping);
        let slots = [
            CommandSlot::SelectAll,
            CommandSlot::SelectAny,
            CommandSlot::Insert,
            CommandSlot::Update,
            CommandSlot::Delete,
        ];
        let first: Vec<String> = slots
            .iter()
            .map(|&slot| mapping.command(slot).unwrap().sql.clone())
            .collect();

        setup_commands(&mapping);
        let second: Vec<String> = slots
            .iter()
            .map(|&slot| mapping.command(slot).unwrap().sql.clone())
            .collect();

        assert_eq!(first, second);
    }
}
