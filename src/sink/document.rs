//! MongoDB document sink: batched inserts, `update_one` with `$set`,
//! `delete_one` by filter, unique index creation at first write to a
//! collection, and `primary-as-_id` handling.

use std::collections::HashSet;

use bson::{doc, Bson, Document};
use mongodb::options::IndexOptions;
use mongodb::sync::{Client, Collection};
use mongodb::IndexModel;
use tracing::debug;

use crate::config::{MongoDbOptions, SinkConfig};
use crate::error::{Error, Result};
use crate::key::{filter_for, Filter, KeyPolicy};
use crate::model::{RowEvent, TableSchema, Value};
use crate::sink::{with_retries, MappingIndex, MutationBatch, SinkAdapter};

const INSERT_BATCH_SIZE: usize = 1000;

pub struct MongoSink {
    client: Client,
    policy: KeyPolicy,
    mapping: MappingIndex,
    indexed_collections: HashSet<String>,
    pending_inserts: Vec<((String, String), Vec<Document>)>,
}

impl MongoSink {
    pub fn connect(config: &SinkConfig) -> Result<Self> {
        let mongo_config = config
            .mongodb
            .as_ref()
            .ok_or_else(|| Error::Configuration("target.mongodb is required for a mongodb sink".into()))?;

        // `maxPoolSize`/`connectTimeoutMS` are valid URI query parameters;
        // `mongodb.options` from the config is appended here rather than
        // rebuilt through `ClientOptions` so a caller's own query
        // parameters in `uri` still take precedence.
        let uri = append_connection_options(&mongo_config.uri, &mongo_config.options);
        let client = Client::with_uri_str(&uri).map_err(Error::Mongo)?;

        Ok(Self {
            client,
            policy: KeyPolicy { primary_as_id: mongo_config.primary },
            mapping: MappingIndex::from_entries(&config.mapping),
            indexed_collections: HashSet::new(),
            pending_inserts: Vec::new(),
        })
    }

    /// The target collection honours the mapping's `target_name` override.
    fn collection_name<'a>(&'a self, schema: &'a TableSchema) -> &'a str {
        self.mapping.table(&schema.key).target_name.as_deref().unwrap_or(&schema.key.table)
    }

    fn collection(&self, schema: &TableSchema) -> Collection<Document> {
        self.client.database(&schema.key.database).collection(self.collection_name(schema))
    }

    /// A single-column PK stored as `_id` inherits MongoDB's implicit `_id`
    /// uniqueness; every other keyed layout (composite PK, or
    /// `primary-as-_id` disabled) gets an explicit unique index at first
    /// sight of the collection.
    fn ensure_index(&mut self, schema: &TableSchema) -> Result<()> {
        let collection_key = schema.key.ci_key();
        if self.indexed_collections.contains(&collection_key) {
            return Ok(());
        }
        self.indexed_collections.insert(collection_key);

        let inherits_id_uniqueness = self.policy.primary_as_id && schema.primary_key.len() == 1;
        if schema.has_primary_key() && !inherits_id_uniqueness {
            let keys = schema.primary_key.iter().fold(Document::new(), |mut doc, col| {
                doc.insert(col, 1);
                doc
            });
            let model = IndexModel::builder().keys(keys).options(IndexOptions::builder().unique(true).build()).build();
            self.collection(schema).create_index(model).run().map_err(Error::Mongo)?;
            debug!(table = %schema.key, "created unique index over primary key columns");
        }
        Ok(())
    }

    fn insert_document(&self, schema: &TableSchema, row: &[Value]) -> Document {
        let configured = &self.mapping.table(&schema.key).columns;
        let mut document = Document::new();
        for (i, col) in schema.columns.iter().enumerate() {
            if !configured.is_empty() && !configured.iter().any(|c| c.eq_ignore_ascii_case(&col.name)) {
                continue;
            }
            let Some(value) = row.get(i) else { continue };
            let use_id = self.policy.primary_as_id && schema.primary_key.len() == 1 && schema.primary_key[0] == col.name;
            let field_name = if use_id { "_id" } else { col.name.as_str() };
            document.insert(field_name, value_to_bson(value));
        }
        document
    }

    fn filter_document(&self, schema: &TableSchema, row: &[Value]) -> Document {
        filter_to_document(filter_for(schema, row, self.policy, self.mapping.table(&schema.key)))
    }
}

/// Appends `maxPoolSize`/`connectTimeoutMS` as connection string query
/// parameters rather than rebuilding the URI through `ClientOptions`, so any
/// query parameters the caller already put in `uri` are left untouched.
fn append_connection_options(uri: &str, options: &MongoDbOptions) -> String {
    let separator = if uri.contains('?') { '&' } else { '?' };
    format!("{uri}{separator}maxPoolSize={}&connectTimeoutMS={}", options.max_pool_size, options.connect_timeout_ms)
}

fn value_to_bson(value: &Value) -> Bson {
    match value {
        Value::Null => Bson::Null,
        Value::Int(v) => Bson::Int64(*v),
        Value::UInt(v) => Bson::Int64(*v as i64),
        Value::Float(v) => Bson::Double(*v),
        Value::Decimal(v) => Bson::String(v.clone()),
        Value::Text(v) => Bson::String(v.clone()),
        Value::Bytes(v) => Bson::String(String::from_utf8_lossy(v).into_owned()),
        Value::Timestamp(v) => Bson::String(v.clone()),
    }
}

fn filter_to_document(filter: Filter) -> Document {
    match filter {
        Filter::ById(value) => doc! { "_id": value_to_bson(&value) },
        Filter::ByColumns(pairs) => {
            let mut document = Document::new();
            for (col, value) in pairs {
                document.insert(col, value_to_bson(&value));
            }
            document
        }
    }
}

impl SinkAdapter for MongoSink {
    fn apply(&mut self, batch: MutationBatch<'_>) -> Result<()> {
        self.ensure_index(batch.schema)?;
        match batch.event {
            RowEvent::Insert { rows, .. } => {
                let documents: Vec<Document> = rows.iter().map(|row| self.insert_document(batch.schema, row)).collect();
                let collection_key = (batch.schema.key.database.clone(), self.collection_name(batch.schema).to_string());
                self.pending_inserts.push((collection_key, documents));
                self.flush_inserts_if_due()?;
            }
            RowEvent::Update { rows, .. } => {
                for (_before, after) in rows {
                    let filter = self.filter_document(batch.schema, after);
                    let set_doc = doc! { "$set": self.insert_document(batch.schema, after) };
                    let collection = self.collection(batch.schema);
                    with_retries("mongodb update", || {
                        collection.update_one(filter.clone(), set_doc.clone()).run().map_err(Error::Mongo)
                    })?;
                }
            }
            RowEvent::Delete { rows, .. } => {
                for row in rows {
                    let filter = self.filter_document(batch.schema, row);
                    let collection = self.collection(batch.schema);
                    with_retries("mongodb delete", || {
                        collection.delete_one(filter.clone()).run().map_err(Error::Mongo)
                    })?;
                }
            }
        }
        Ok(())
    }

    fn dump(&mut self, schema: &TableSchema, rows: Vec<Vec<Value>>) -> Result<()> {
        self.ensure_index(schema)?;
        for chunk in rows.chunks(INSERT_BATCH_SIZE) {
            let documents: Vec<Document> = chunk.iter().map(|row| self.insert_document(schema, row)).collect();
            if !documents.is_empty() {
                let collection = self.collection(schema);
                with_retries("mongodb bootstrap insert", || {
                    collection.insert_many(documents.clone()).run().map_err(Error::Mongo)
                })?;
            }
        }
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        self.flush_inserts()
    }
}

impl MongoSink {
    fn flush_inserts_if_due(&mut self) -> Result<()> {
        let total: usize = self.pending_inserts.iter().map(|(_, docs)| docs.len()).sum();
        if total >= INSERT_BATCH_SIZE {
            self.flush_inserts()?;
        }
        Ok(())
    }

    fn flush_inserts(&mut self) -> Result<()> {
        for ((database, collection), documents) in self.pending_inserts.drain(..) {
            if documents.is_empty() {
                continue;
            }
            let collection = self.client.database(&database).collection::<Document>(&collection);
            with_retries("mongodb insert", || {
                collection.insert_many(documents.clone()).run().map_err(Error::Mongo)
            })?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn appends_options_with_question_mark_when_uri_has_none() {
        let options = MongoDbOptions { max_pool_size: 5, connect_timeout_ms: 2000 };
        let uri = append_connection_options("mongodb://localhost:27017", &options);
        assert_eq!(uri, "mongodb://localhost:27017?maxPoolSize=5&connectTimeoutMS=2000");
    }

    #[test]
    fn appends_options_with_ampersand_when_uri_already_has_query() {
        let options = MongoDbOptions { max_pool_size: 5, connect_timeout_ms: 2000 };
        let uri = append_connection_options("mongodb://localhost:27017/db?retryWrites=true", &options);
        assert_eq!(uri, "mongodb://localhost:27017/db?retryWrites=true&maxPoolSize=5&connectTimeoutMS=2000");
    }
}
