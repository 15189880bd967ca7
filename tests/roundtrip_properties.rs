//! Round-trip property: upgrading a revision of non-destructive operations and
//! downgrading it again restores the schema and the stored rows

use proptest::prelude::*;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde_json::json;
use strata::backend::MemoryBackend;
use strata::migration::{
    ColumnSpec, ColumnType, ConstraintKind, ConstraintSpec, Migrator, Operation, Revision,
    RevisionId, StaticSource, Target,
};

/// Tables and columns as the generator believes them to be
struct Model {
    tables: Vec<(String, Vec<(String, ColumnType)>)>,
    next_name: usize,
}

impl Model {
    fn fresh(&mut self, prefix: &str) -> String {
        self.next_name += 1;
        format!("{prefix}{}", self.next_name)
    }

    fn pick_table(&self, rng: &mut StdRng) -> usize {
        rng.gen_range(0..self.tables.len())
    }

    /// One operation valid against the current model, applied to it
    fn next_operation(&mut self, rng: &mut StdRng) -> Operation {
        loop {
            match rng.gen_range(0..6) {
                0 => {
                    let table = self.fresh("t");
                    let id = ("id".to_string(), ColumnType::Integer);
                    self.tables.push((table.clone(), vec![id]));
                    return Operation::CreateTable {
                        table,
                        columns: vec![ColumnSpec::new("id", ColumnType::Integer).primary_key()],
                    };
                }
                1 => {
                    let t = self.pick_table(rng);
                    let to = self.fresh("t");
                    let from = std::mem::replace(&mut self.tables[t].0, to.clone());
                    return Operation::RenameTable { from, to };
                }
                2 => {
                    let t = self.pick_table(rng);
                    let name = self.fresh("c");
                    let ty = [ColumnType::Integer, ColumnType::Text, ColumnType::Boolean]
                        [rng.gen_range(0..3)];
                    self.tables[t].1.push((name.clone(), ty));
                    return Operation::AddColumn {
                        table: self.tables[t].0.clone(),
                        column: ColumnSpec::new(name, ty),
                    };
                }
                3 => {
                    let t = self.pick_table(rng);
                    let c = rng.gen_range(0..self.tables[t].1.len());
                    let to = self.fresh("c");
                    let from = std::mem::replace(&mut self.tables[t].1[c].0, to.clone());
                    return Operation::RenameColumn {
                        table: self.tables[t].0.clone(),
                        from,
                        to,
                    };
                }
                4 => {
                    let t = self.pick_table(rng);
                    let integers: Vec<usize> = (0..self.tables[t].1.len())
                        .filter(|&c| self.tables[t].1[c].1 == ColumnType::Integer)
                        .collect();
                    if integers.is_empty() {
                        continue;
                    }
                    let c = integers[rng.gen_range(0..integers.len())];
                    let to = if rng.gen_bool(0.5) {
                        ColumnType::BigInteger
                    } else {
                        ColumnType::Text
                    };
                    self.tables[t].1[c].1 = to;
                    return Operation::AlterColumnType {
                        table: self.tables[t].0.clone(),
                        column: self.tables[t].1[c].0.clone(),
                        from: ColumnType::Integer,
                        to,
                    };
                }
                _ => {
                    let t = self.pick_table(rng);
                    let c = rng.gen_range(0..self.tables[t].1.len());
                    let name = self.fresh("uq");
                    return Operation::AddConstraint {
                        table: self.tables[t].0.clone(),
                        constraint: ConstraintSpec::named(
                            name,
                            ConstraintKind::Unique {
                                columns: vec![self.tables[t].1[c].0.clone()],
                            },
                        ),
                    };
                }
            }
        }
    }
}

fn base_revision() -> Revision {
    Revision::reversible(
        RevisionId::from("ae1027a6acf0"),
        None,
        "create department",
        vec![Operation::CreateTable {
            table: "department".into(),
            columns: vec![
                ColumnSpec::new("id", ColumnType::Integer).primary_key(),
                ColumnSpec::new("address", ColumnType::Text),
                ColumnSpec::new("headcount", ColumnType::Integer),
            ],
        }],
    )
    .unwrap()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    #[test]
    fn up_then_down_restores_schema_and_rows(seed in any::<u64>()) {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut model = Model {
            tables: vec![(
                "department".to_string(),
                vec![
                    ("id".to_string(), ColumnType::Integer),
                    ("address".to_string(), ColumnType::Text),
                    ("headcount".to_string(), ColumnType::Integer),
                ],
            )],
            next_name: 0,
        };
        let count = rng.gen_range(1..=8);
        let operations: Vec<Operation> =
            (0..count).map(|_| model.next_operation(&mut rng)).collect();

        let change = Revision::reversible(
            RevisionId::from("1975ea83b712"),
            Some(RevisionId::from("ae1027a6acf0")),
            "random change",
            operations.clone(),
        )
        .unwrap();

        let backend = MemoryBackend::new();
        let migrator = Migrator::from_source(&StaticSource::new(vec![base_revision(), change])).unwrap();
        migrator.upgrade(&backend, &Target::Relative(1)).unwrap();
        for (id, address) in [(1, "12 Main St"), (2, "4 Mill Lane")] {
            backend
                .insert_row(
                    "department",
                    [("id", json!(id)), ("address", json!(address)), ("headcount", json!(id * 10))],
                )
                .unwrap();
        }

        let schema_before = backend.schema().unwrap();
        let rows_before = backend.rows("department").unwrap();

        let up = migrator.upgrade(&backend, &Target::Head);
        prop_assert!(up.is_ok(), "upgrade failed for {:?}: {:?}", operations, up.err());

        let down = migrator.downgrade(&backend, &Target::Relative(-1));
        prop_assert!(down.is_ok(), "downgrade failed for {:?}: {:?}", operations, down.err());

        prop_assert_eq!(backend.schema().unwrap(), schema_before);
        prop_assert_eq!(backend.rows("department").unwrap(), rows_before);
    }
}
