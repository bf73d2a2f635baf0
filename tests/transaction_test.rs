//! Transaction and relationship tests against in-memory SQLite.

use relmap::{
    Entity, EntityModel, IntoValue, ModelBuilder, Orm, OrmConfig, OrmError, Prop,
};
use tokio_test::assert_ok;

#[derive(Debug, Default, Clone, PartialEq)]
struct Team {
    id: Option<i64>,
    name: String,
}

impl Entity for Team {
    fn model() -> EntityModel {
        ModelBuilder::<Team>::new()
            .prop(Prop::new("id", |t: &Team| t.id, |t, v| t.id = v))
            .prop(Prop::new("name", |t: &Team| t.name.clone(), |t, v| t.name = v))
            .build()
    }
}

#[derive(Debug, Default, Clone)]
struct Player {
    id: Option<i64>,
    name: String,
    team: Option<Team>,
    populated: bool,
}

impl Entity for Player {
    fn model() -> EntityModel {
        ModelBuilder::<Player>::new()
            .prop(Prop::new("id", |p: &Player| p.id, |p, v| p.id = v))
            .prop(Prop::new("name", |p: &Player| p.name.clone(), |p, v| p.name = v))
            .prop(
                Prop::reference("team", |p: &Player| p.team.as_ref(), |p, t| p.team = t)
                    .column("team_id"),
            )
            .populated_by(|p| &mut p.populated)
            .build()
    }
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

async fn league_orm() -> Orm {
    init_tracing();
    let orm = Orm::new(OrmConfig::default());
    orm.connect("sqlite::memory:").await.unwrap();
    orm.execute_update(
        None,
        "CREATE TABLE team (id INTEGER PRIMARY KEY AUTOINCREMENT, name TEXT)",
        vec![],
    )
    .await
    .unwrap();
    orm.execute_update(
        None,
        "CREATE TABLE player (id INTEGER PRIMARY KEY AUTOINCREMENT, name TEXT, team_id INTEGER)",
        vec![],
    )
    .await
    .unwrap();
    orm
}

async fn team_names(orm: &Orm) -> Vec<String> {
    orm.read_values(None, "SELECT name FROM team ORDER BY name", vec![])
        .await
        .unwrap()
}

#[tokio::test]
async fn test_inner_rollback_preserves_outer_work() {
    let orm = league_orm().await;

    let mut session = orm.begin().await.unwrap();
    for name in ["alpha", "beta"] {
        let mut team = Team {
            id: None,
            name: name.into(),
        };
        orm.create(Some(&mut session), &mut team).await.unwrap();
    }

    // Second level: rolled back, its row must vanish.
    session.begin().await.unwrap();
    let mut doomed = Team {
        id: None,
        name: "doomed".into(),
    };
    orm.create(Some(&mut session), &mut doomed).await.unwrap();

    // Third level: committed inside the doomed second level.
    session.begin().await.unwrap();
    let mut nested = Team {
        id: None,
        name: "nested".into(),
    };
    orm.create(Some(&mut session), &mut nested).await.unwrap();
    session.commit().await.unwrap();

    session.rollback().await.unwrap();

    // The session is still usable at the outer level.
    let mut gamma = Team {
        id: None,
        name: "gamma".into(),
    };
    assert_ok!(orm.create(Some(&mut session), &mut gamma).await);
    session.commit().await.unwrap();
    session.close().await.unwrap();

    assert_eq!(team_names(&orm).await, vec!["alpha", "beta", "gamma"]);
}

#[tokio::test]
async fn test_outer_rollback_discards_everything() {
    let orm = league_orm().await;

    let mut session = orm.begin().await.unwrap();
    let mut team = Team {
        id: None,
        name: "ghost".into(),
    };
    orm.create(Some(&mut session), &mut team).await.unwrap();
    session.rollback().await.unwrap();
    session.close().await.unwrap();

    assert!(team_names(&orm).await.is_empty());
}

#[tokio::test]
async fn test_transaction_scope_commits_on_ok() {
    let orm = league_orm().await;
    orm.transaction(async |session| {
        let mut team = Team {
            id: None,
            name: "kept".into(),
        };
        orm.create(Some(session), &mut team).await
    })
    .await
    .unwrap();

    assert_eq!(team_names(&orm).await, vec!["kept"]);
}

#[tokio::test]
async fn test_transaction_scope_rolls_back_on_err() {
    let orm = league_orm().await;
    let result: Result<(), OrmError> = orm
        .transaction(async |session| {
            let mut team = Team {
                id: None,
                name: "lost".into(),
            };
            orm.create(Some(session), &mut team).await?;
            Err(OrmError::config("abort"))
        })
        .await;
    assert!(result.is_err());

    assert!(team_names(&orm).await.is_empty());
}

#[tokio::test]
async fn test_nested_scope_on_session() {
    let orm = league_orm().await;
    let mut session = orm.begin().await.unwrap();

    let failed: Result<(), OrmError> = session
        .nested(async |_| Err(OrmError::config("inner abort")))
        .await;
    assert!(failed.is_err());

    let mut team = Team {
        id: None,
        name: "after".into(),
    };
    orm.create(Some(&mut session), &mut team).await.unwrap();
    session.commit().await.unwrap();
    session.close().await.unwrap();

    assert_eq!(team_names(&orm).await, vec!["after"]);
}

#[tokio::test]
async fn test_reference_column_stores_parent_key() {
    let orm = league_orm().await;
    let mut team = Team {
        id: None,
        name: "reds".into(),
    };
    orm.create(None, &mut team).await.unwrap();

    let mut player = Player {
        id: None,
        name: "kim".into(),
        team: Some(team.clone()),
        populated: false,
    };
    orm.create(None, &mut player).await.unwrap();

    let stored: Option<i64> = orm
        .read_one_value(
            None,
            "SELECT team_id FROM player WHERE id = ?",
            vec![player.id.into_value()],
        )
        .await
        .unwrap();
    assert_eq!(stored, team.id);
}

#[tokio::test]
async fn test_loaded_reference_is_key_only_placeholder() {
    let orm = league_orm().await;
    let mut team = Team {
        id: None,
        name: "blues".into(),
    };
    orm.create(None, &mut team).await.unwrap();
    let mut player = Player {
        id: None,
        name: "lee".into(),
        team: Some(team.clone()),
        populated: false,
    };
    orm.create(None, &mut player).await.unwrap();

    let loaded: Player = orm
        .find_by_id(None, player.id)
        .await
        .unwrap()
        .expect("player row");
    let placeholder = loaded.team.expect("reference placeholder");
    assert_eq!(placeholder.id, team.id);
    // Only the key is carried; the rest is loaded on demand.
    assert!(placeholder.name.is_empty());
}

#[tokio::test]
async fn test_get_details_writes_parent_back() {
    let orm = league_orm().await;
    let mut team = Team {
        id: None,
        name: "greens".into(),
    };
    orm.create(None, &mut team).await.unwrap();
    let mut other = Team {
        id: None,
        name: "others".into(),
    };
    orm.create(None, &mut other).await.unwrap();

    for (name, t) in [("ana", &team), ("bo", &team), ("cy", &other)] {
        let mut p = Player {
            id: None,
            name: name.into(),
            team: Some(t.clone()),
            populated: false,
        };
        orm.create(None, &mut p).await.unwrap();
    }

    let roster: Vec<Player> = orm.get_details(None, &team, None).await.unwrap();
    assert_eq!(roster.len(), 2);
    for player in &roster {
        assert_eq!(player.team.as_ref().map(|t| t.name.as_str()), Some("greens"));
    }
}

#[tokio::test]
async fn test_populate_fills_placeholder_once() {
    let orm = league_orm().await;
    let mut original = Player {
        id: None,
        name: "sam".into(),
        team: None,
        populated: false,
    };
    orm.create(None, &mut original).await.unwrap();

    let mut placeholder = Player {
        id: original.id,
        ..Player::default()
    };
    orm.populate(None, &mut placeholder).await.unwrap();
    assert_eq!(placeholder.name, "sam");
    assert!(placeholder.populated);

    // A second populate must not re-read; change the row underneath first.
    orm.execute_update(
        None,
        "UPDATE player SET name = ? WHERE id = ?",
        vec!["renamed".into_value(), original.id.into_value()],
    )
    .await
    .unwrap();
    orm.populate(None, &mut placeholder).await.unwrap();
    assert_eq!(placeholder.name, "sam");
}

#[tokio::test]
async fn test_populate_with_null_key_is_noop() {
    let orm = league_orm().await;
    let mut blank = Player::default();
    orm.populate(None, &mut blank).await.unwrap();
    assert!(blank.name.is_empty());
    assert!(!blank.populated);
}

#[tokio::test]
async fn test_populate_missing_row_errors() {
    let orm = league_orm().await;
    let mut phantom = Player {
        id: Some(424242),
        ..Player::default()
    };
    let err = orm
        .populate(None, &mut phantom)
        .await
        .expect_err("no such row");
    assert!(err.is_config());
    assert!(err.to_string().contains("not found"));
}
