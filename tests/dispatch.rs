use std::net::SocketAddr;

use netbots::config::SimConfig;
use netbots::game::world::{Phase, World};
use netbots::game::step;
use netbots::net::codec::Envelope;
use netbots::net::protocol::Message;
use netbots::server::Dispatcher;

fn addr(port: u16) -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], port))
}

fn send(dispatcher: &mut Dispatcher, world: &mut World, src: SocketAddr, body: Message) -> Option<Message> {
    let report = dispatcher.dispatch(world, vec![(Envelope::with_id(body, 7), src)]);
    report.replies.into_iter().next().map(|(env, dest)| {
        assert_eq!(dest, src);
        assert_eq!(env.msg_id, Some(7));
        env.body
    })
}

fn join(dispatcher: &mut Dispatcher, world: &mut World, port: u16) {
    let reply = send(
        dispatcher,
        world,
        addr(port),
        Message::JoinRequest {
            name: format!("bot{port}"),
            class: None,
        },
    );
    assert!(matches!(reply, Some(Message::JoinReply { .. })));
}

#[test]
fn robots_join_fight_and_report() {
    let conf = SimConfig {
        bots_in_game: 2,
        drop_rate: 0,
        ..SimConfig::default()
    };
    let mut dispatcher = Dispatcher::new(&conf);
    let mut world = World::new(conf, 9);

    join(&mut dispatcher, &mut world, 1);
    assert!(!world.ready_to_start());

    // Not enough robots yet, and only joined robots may ask questions
    let refused = send(&mut dispatcher, &mut world, addr(2), Message::GetInfoRequest {});
    assert!(matches!(refused, Some(Message::Error { .. })));

    join(&mut dispatcher, &mut world, 2);
    assert!(world.ready_to_start());
    world.start_game().unwrap();
    assert_eq!(world.phase(), Phase::Running);

    // Full game turns away a third robot
    let full = send(
        &mut dispatcher,
        &mut world,
        addr(3),
        Message::JoinRequest {
            name: "late".into(),
            class: None,
        },
    );
    assert_eq!(full, Some(Message::error("Game is full")));

    // Line the robots up and shoot along the row
    for (port, x) in [(1, 300.0), (2, 500.0)] {
        let robot = world.robots.get_mut(&addr(port)).unwrap();
        robot.x = x;
        robot.y = 500.0;
    }

    let scan = send(
        &mut dispatcher,
        &mut world,
        addr(1),
        Message::ScanRequest {
            start_radians: 6.0,
            end_radians: 0.3,
        },
    );
    assert_eq!(scan, Some(Message::ScanReply { distance: 200.0 }));

    let fired = send(
        &mut dispatcher,
        &mut world,
        addr(1),
        Message::FireCanonRequest {
            direction: 0.0,
            distance: 200.0,
        },
    );
    assert_eq!(fired, Some(Message::FireCanonReply {}));
    assert_eq!(
        send(&mut dispatcher, &mut world, addr(1), Message::GetCanonRequest {}),
        Some(Message::GetCanonReply {
            shell_in_progress: true
        })
    );

    for _ in 0..5 {
        step(&mut world);
    }

    match send(&mut dispatcher, &mut world, addr(2), Message::GetInfoRequest {}) {
        Some(Message::GetInfoReply {
            game_number,
            game_step,
            health,
            points,
        }) => {
            assert_eq!(game_number, 1);
            assert_eq!(game_step, 5);
            assert_eq!(health, 90.0);
            assert_eq!(points, 0);
        }
        other => panic!("unexpected {other:?}"),
    }
    assert_eq!(world.robots[&addr(1)].shell_damage, 10.0);
}

#[test]
fn viewers_receive_conf_and_stay_out_of_the_game() {
    let conf = SimConfig {
        bots_in_game: 1,
        drop_rate: 0,
        ..SimConfig::default()
    };
    let mut dispatcher = Dispatcher::new(&conf);
    let mut world = World::new(conf.clone(), 1);

    match send(&mut dispatcher, &mut world, addr(50), Message::AddViewerRequest {}) {
        Some(Message::AddViewerReply { conf: sent }) => assert_eq!(*sent, conf),
        other => panic!("unexpected {other:?}"),
    }
    assert!(world.spectators.contains_key(&addr(50)));

    // Keep-alives are silent
    assert_eq!(send(&mut dispatcher, &mut world, addr(50), Message::ViewKeepAlive {}), None);

    let refused = send(
        &mut dispatcher,
        &mut world,
        addr(50),
        Message::JoinRequest {
            name: "peek".into(),
            class: None,
        },
    );
    assert!(matches!(refused, Some(Message::Error { .. })));
    assert!(world.robots.is_empty());
}
