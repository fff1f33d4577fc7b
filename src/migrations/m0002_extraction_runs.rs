use cetane::prelude::*;

pub fn migration() -> Migration {
    Migration::new("0002_extraction_runs")
        .depends_on(&["0001_initial_schema"])
        .operation(
            CreateTable::new("extraction_runs")
                .add_field(Field::new("id", FieldType::Text).primary_key())
                .add_field(Field::new("company", FieldType::Text).not_null())
                .add_field(Field::new("started_at", FieldType::Text).not_null())
                .add_field(Field::new("finished_at", FieldType::Text).not_null())
                .add_field(Field::new("stopped_because", FieldType::Text).not_null())
                .add_field(Field::new("stats", FieldType::Text).not_null().default("'{}'"))
                .add_field(Field::new("errors", FieldType::Text).not_null().default("'{}'"))
                .add_field(
                    Field::new("records_persisted", FieldType::Integer)
                        .not_null()
                        .default("0"),
                )
                .add_field(
                    Field::new("records_failed", FieldType::Integer)
                        .not_null()
                        .default("0"),
                ),
        )
        .operation(AddIndex::new(
            "extraction_runs",
            Index::new("idx_extraction_runs_company")
                .column("company")
                .column_desc("started_at"),
        ))
}
