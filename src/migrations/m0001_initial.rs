use cetane::prelude::*;

pub fn migration() -> Migration {
    Migration::new("0001_initial_schema")
        .operation(
            CreateTable::new("pqr_records")
                .add_field(Field::new("id", FieldType::Text).primary_key())
                .add_field(Field::new("company", FieldType::Text).not_null())
                .add_field(Field::new("external_id", FieldType::Text))
                .add_field(Field::new("content_hash", FieldType::Text).not_null())
                .add_field(Field::new("category", FieldType::Text).not_null().default("'pqr'"))
                .add_field(Field::new("record_date", FieldType::Text))
                .add_field(Field::new("fields", FieldType::Text).not_null().default("'{}'"))
                .add_field(Field::new("attachments", FieldType::Text).not_null().default("'[]'"))
                .add_field(Field::new("artifact_kind", FieldType::Text).not_null())
                .add_field(Field::new("artifact_key", FieldType::Text))
                .add_field(Field::new("source_url", FieldType::Text).not_null())
                .add_field(Field::new("created_at", FieldType::Text).not_null())
                .add_field(Field::new("updated_at", FieldType::Text).not_null()),
        )
        // One row per company and portal id; rows without an id are keyed
        // by content hash instead.
        .operation(AddIndex::new(
            "pqr_records",
            Index::new("idx_pqr_company_external_id")
                .column("company")
                .column("external_id")
                .unique()
                .filter("external_id IS NOT NULL"),
        ))
        .operation(AddIndex::new(
            "pqr_records",
            Index::new("idx_pqr_company_content_hash")
                .column("company")
                .column("content_hash")
                .unique(),
        ))
        .operation(AddIndex::new(
            "pqr_records",
            Index::new("idx_pqr_company_created")
                .column("company")
                .column_desc("created_at"),
        ))
}
