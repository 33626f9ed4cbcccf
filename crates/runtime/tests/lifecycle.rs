//! End-to-end session lifecycle: phase progression, listener scoping, and
//! teardown, driven through the public API only.

use std::cell::Cell;
use std::rc::Rc;

use serde_json::json;

use runtime::{
    ActorId, Capability, ConfigurationError, EventType, GameEvent, Instance, InstanceDirectory,
    ListenerSpec, Phase, Role,
};

fn lobby() -> Phase {
    Phase::new("lobby", 0)
}

fn playing() -> Phase {
    Phase::new("playing", 1)
}

fn finale() -> Phase {
    Phase::new("end", 2)
}

fn arena() -> Instance {
    Instance::builder("arena")
        .allowed_phases(vec![lobby(), playing(), finale()])
        .parameters(json!({ "map": "crossfire" }))
        .build()
}

fn tally() -> (Rc<Cell<u32>>, impl Fn(&GameEvent, &mut Instance) -> anyhow::Result<()>) {
    let count = Rc::new(Cell::new(0));
    let captured = Rc::clone(&count);
    (count, move |_: &GameEvent, _: &mut Instance| {
        captured.set(captured.get() + 1);
        Ok(())
    })
}

#[test]
fn full_match_lifecycle() {
    let mut instance = arena();

    // Persistent, but gated: scoring only counts during play.
    let (goals, on_goal) = tally();
    instance
        .on_for_phases(
            ListenerSpec::new(EventType::Custom("goal")).require(Capability::IS_PARTICIPATING),
            vec![playing()],
            on_goal,
        )
        .unwrap();

    // Phase-scoped: the lobby countdown banner dies with the lobby.
    let (banners, on_banner) = tally();
    let (chat, on_chat) = tally();

    assert!(!instance.is_started());
    instance.set_phase(lobby()).unwrap();
    assert!(instance.is_started());

    instance
        .on_phase_scoped(ListenerSpec::new(EventType::Custom("banner")), on_banner)
        .unwrap();
    // Gated range listener spanning lobby and play, registered persistently.
    instance
        .on_for_phase_range(
            ListenerSpec::new(EventType::Custom("chat")),
            &lobby(),
            &playing(),
            on_chat,
        )
        .unwrap();

    instance.add_participant(ActorId(1), Role::Playing).unwrap();
    instance.add_participant(ActorId(2), Role::Observing).unwrap();

    // Goals do not count in the lobby; banners and chat do.
    let goal_by_player = GameEvent::new(EventType::Custom("goal")).with_actor(ActorId(1));
    instance.broadcast(&goal_by_player);
    instance.broadcast(&GameEvent::new(EventType::Custom("banner")));
    instance.broadcast(&GameEvent::new(EventType::Custom("chat")));
    assert_eq!(goals.get(), 0);
    assert_eq!(banners.get(), 1);
    assert_eq!(chat.get(), 1);

    // A lobby-only repeating task: purged automatically on transition.
    let lobby_pulses = Rc::new(Cell::new(0u32));
    let captured = Rc::clone(&lobby_pulses);
    instance
        .schedule_loop_in_phase(1, 1, 100, move |_: &mut Instance| -> anyhow::Result<()> {
            captured.set(captured.get() + 1);
            Ok(())
        })
        .unwrap();
    instance.tick();
    instance.tick();
    assert_eq!(lobby_pulses.get(), 2);

    let left = instance.set_phase(playing()).unwrap();
    assert_eq!(left, lobby());

    // The banner listener and lobby loop are gone; the gated ones woke up.
    instance.broadcast(&GameEvent::new(EventType::Custom("banner")));
    instance.tick();
    assert_eq!(banners.get(), 1);
    assert_eq!(lobby_pulses.get(), 2);

    instance.broadcast(&goal_by_player);
    // Observers do not score.
    instance.broadcast(&GameEvent::new(EventType::Custom("goal")).with_actor(ActorId(2)));
    // Nor do strangers.
    instance.broadcast(&GameEvent::new(EventType::Custom("goal")).with_actor(ActorId(9)));
    instance.broadcast(&GameEvent::new(EventType::Custom("chat")));
    assert_eq!(goals.get(), 1);
    assert_eq!(chat.get(), 2);

    // End-of-phase cleanup runs while still in play, before the finale.
    let cleaned_in = Rc::new(std::cell::RefCell::new(String::new()));
    let captured = Rc::clone(&cleaned_in);
    instance
        .at_phase_end(move |i: &mut Instance| {
            *captured.borrow_mut() = i.phase().id.clone();
        })
        .unwrap();

    instance.set_phase(finale()).unwrap();
    assert_eq!(*cleaned_in.borrow(), "playing");

    // Outside both gates now.
    instance.broadcast(&goal_by_player);
    instance.broadcast(&GameEvent::new(EventType::Custom("chat")));
    assert_eq!(goals.get(), 1);
    assert_eq!(chat.get(), 2);

    instance.close();
    assert!(instance.is_closed());
    assert!(instance.participants().is_empty());
    assert!(matches!(
        instance.set_phase(lobby()),
        Err(ConfigurationError::Closed)
    ));
}

#[test]
fn phase_transition_rejects_undeclared_phases_atomically() {
    let mut instance = arena();
    instance.set_phase(lobby()).unwrap();

    let (count, listener) = tally();
    instance
        .on_phase_scoped(ListenerSpec::new(EventType::Custom("ping")), listener)
        .unwrap();

    let err = instance.set_phase(Phase::new("sudden_death", 7)).unwrap_err();
    match err {
        ConfigurationError::PhaseNotAllowed { phase, allowed } => {
            assert_eq!(phase, "sudden_death");
            assert_eq!(allowed, vec!["lobby", "playing", "end"]);
        }
        other => panic!("unexpected error: {other}"),
    }

    // Still in the lobby, phase bucket intact.
    assert_eq!(instance.phase(), &lobby());
    instance.broadcast(&GameEvent::new(EventType::Custom("ping")));
    assert_eq!(count.get(), 1);
}

#[test]
fn directory_forwards_lifecycle_events_and_drives_ticks() {
    let mut directory = InstanceDirectory::new();

    let transitions = Rc::new(Cell::new(0u32));
    let captured = Rc::clone(&transitions);
    directory.subscribe(EventType::PhaseChanged, 0, move |event, _| {
        assert!(event.source.is_some());
        captured.set(captured.get() + 1);
        Ok(())
    });

    let a = directory.insert(arena());
    let b = directory.insert(arena());

    directory.get_mut(a).unwrap().set_phase(lobby()).unwrap();
    directory.get_mut(b).unwrap().set_phase(lobby()).unwrap();
    directory.pump_outboxes();
    assert_eq!(transitions.get(), 2);

    // Pausing one instance freezes only its clock.
    directory.get_mut(b).unwrap().set_paused(true).unwrap();
    for _ in 0..3 {
        directory.tick_all();
    }
    assert_eq!(directory.get(a).unwrap().uptime(), 3);
    assert_eq!(directory.get(b).unwrap().uptime(), 0);

    directory.shutdown();
    assert!(directory.is_empty());
}

#[test]
fn self_scoped_listeners_ignore_other_instances_events() {
    let mut directory = InstanceDirectory::new();
    let a = directory.insert(arena());
    let b = directory.insert(arena());

    let (own_hits, listener) = tally();
    directory
        .get_mut(a)
        .unwrap()
        .on(
            ListenerSpec::new(EventType::Custom("finished")).require(Capability::SCOPED_TO_SELF),
            listener,
        )
        .unwrap();

    // An event attributed to instance B passes through A's listeners but
    // fails A's identity filter.
    let from_b = GameEvent::new(EventType::Custom("finished"))
        .scoped_to(directory.get(b).unwrap().uuid());
    directory.broadcast(&from_b);
    assert_eq!(own_hits.get(), 0);

    let from_a = GameEvent::new(EventType::Custom("finished"))
        .scoped_to(directory.get(a).unwrap().uuid());
    directory.broadcast(&from_a);
    assert_eq!(own_hits.get(), 1);
}
