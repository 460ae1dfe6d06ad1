//! 包含层次的展平、接口库所合并与令牌同步

use hpn::anim::Animator;
use hpn::hierarchy::Scope;
use hpn::net::{Arc, Count, DEFAULT_COLOR, MergeInterfaceState, NodeId, PetriNet, Place, Transition};
use hpn::{IncludeError, IncludeHierarchy, flatten};

struct Fixture {
    tree: IncludeHierarchy,
    producer: NodeId,
    consumer: NodeId,
    away: String,
}

/// root
/// ├── producer: Buffer(3) <- Make
/// └── consumer: uses Buffer, Take -> Done
fn fixture() -> Fixture {
    let mut producer_net = PetriNet::new("producer");
    producer_net.add_place(Place::new("Buffer").with_tokens(DEFAULT_COLOR, 3u64)).unwrap();
    producer_net.add_transition(Transition::new("Make").with_priority(0)).unwrap();
    producer_net
        .add_arc(Arc::outbound("made", "Make", "Buffer").with_weight(DEFAULT_COLOR, "1"))
        .unwrap();

    let mut tree = IncludeHierarchy::new(PetriNet::new("root"), "root");
    let root = tree.root();
    let producer = tree.include(root, producer_net, "producer").unwrap();
    let consumer = tree.include(root, PetriNet::new("consumer"), "consumer").unwrap();
    let away = tree.add_to_interface(producer, "Buffer").unwrap();
    tree.use_interface_place(consumer, &away).unwrap();

    let net = tree.net_mut(consumer).unwrap();
    net.add_place(Place::new("Done")).unwrap();
    net.add_transition(Transition::new("Take").with_priority(2)).unwrap();
    net.add_arc(Arc::inbound("take", away.as_str(), "Take").with_weight(DEFAULT_COLOR, "1"))
        .unwrap();
    net.add_arc(Arc::outbound("done", "Take", "Done").with_weight(DEFAULT_COLOR, "1"))
        .unwrap();

    Fixture {
        tree,
        producer,
        consumer,
        away,
    }
}

#[test]
fn consumer_arcs_point_at_the_home_place() {
    let Fixture { tree, consumer, away, .. } = fixture();
    let net = flatten(&tree).unwrap();

    let places: Vec<&str> = net.places().map(|p| p.id.as_str()).collect();
    assert_eq!(places, vec!["producer.Buffer", "consumer.Done"]);
    assert!(net.places().all(|p| p.status.merge != MergeInterfaceState::Away));
    assert_eq!(net.arc("consumer.take").unwrap().source, "producer.Buffer");
    assert_eq!(net.bindings().flat_of(consumer, &away), Some("producer.Buffer"));
    assert_eq!(net.bindings().sources_of("producer.Buffer").len(), 2);
}

#[test]
fn firing_flows_back_into_every_source() {
    let Fixture {
        mut tree,
        producer,
        consumer,
        away,
    } = fixture();
    let mut animator = Animator::with_seed(flatten(&tree).unwrap(), 3).unwrap();

    let firing = animator.fire_transition("consumer.Take").unwrap();
    assert_eq!(firing.changes.len(), 2);
    animator.net().push_to_sources(&mut tree).unwrap();

    let count = |tree: &IncludeHierarchy, node: NodeId, place: &str| {
        tree.net(node).unwrap().place(place).unwrap().count(DEFAULT_COLOR)
    };
    assert_eq!(count(&tree, producer, "Buffer"), Count::from(2));
    assert_eq!(count(&tree, consumer, &away), Count::from(2));
    assert_eq!(count(&tree, consumer, "Done"), Count::from(1));

    tree.net_mut(producer)
        .unwrap()
        .set_tokens("Buffer", DEFAULT_COLOR, Count::from(9))
        .unwrap();
    animator.net_mut().pull_from_sources(&tree).unwrap();
    assert_eq!(animator.state().tokens("producer.Buffer", DEFAULT_COLOR), Count::from(9));
}

#[test]
fn flattening_is_repeatable() {
    let Fixture { tree, .. } = fixture();
    let first = flatten(&tree).unwrap();
    let second = flatten(&tree).unwrap();
    assert_eq!(first, second);
    assert_eq!(first.initial_state(), second.initial_state());
}

#[test]
fn structural_changes_rebuild_in_place() {
    let Fixture { mut tree, producer, .. } = fixture();
    let mut net = flatten(&tree).unwrap();
    assert!(!net.needs_refresh(&tree));

    tree.net_mut(producer).unwrap().add_place(Place::new("Spare")).unwrap();
    assert!(net.needs_refresh(&tree));
    net.refresh(&tree).unwrap();
    assert!(net.place("producer.Spare").is_ok());
}

#[test]
fn standalone_consumer_has_no_home() {
    let Fixture { tree, consumer, .. } = fixture();
    let standalone = tree.net(consumer).unwrap().clone();
    let err = flatten(&IncludeHierarchy::new(standalone, "consumer")).unwrap_err();
    assert!(matches!(err, IncludeError::MissingHome { node, .. } if node == "consumer"));
}

#[test]
fn detaching_a_user_of_the_interface_is_refused() {
    let Fixture { mut tree, producer, .. } = fixture();
    let root = tree.root();
    assert!(tree.remove_include(root, "producer").is_err());
    assert!(tree.node(producer).is_some());
}

#[test]
fn nested_nodes_get_unique_names() {
    let mut tree = IncludeHierarchy::new(PetriNet::new("main"), "main").with_access_scope(Scope::All);
    let root = tree.root();
    let clash = tree.include(root, PetriNet::new("main"), "main").unwrap();
    let inner = tree.include(clash, PetriNet::new("leaf"), "leaf").unwrap();
    tree.net_mut(inner).unwrap().add_place(Place::new("P")).unwrap();

    assert_eq!(tree.node(clash).unwrap().name(), "main1");
    assert_eq!(tree.node(inner).unwrap().qualified_name(), "main.main1.leaf");
    assert_eq!(tree.find("main.main1.leaf"), Some(inner));

    let net = flatten(&tree).unwrap();
    assert!(net.place("main1.leaf.P").is_ok());
}

#[test]
fn configured_scope_limits_who_sees_the_interface() {
    hpn::init_logger();
    let config = hpn::HpnConfig::from_toml("interface_access_scope = \"parent\"\n").unwrap();
    let mut tree = IncludeHierarchy::from_config(PetriNet::new("root"), "root", &config);
    let root = tree.root();
    let mut lib = PetriNet::new("lib");
    lib.add_place(Place::new("Shared")).unwrap();
    let lib = tree.include(root, lib, "lib").unwrap();
    let sibling = tree.include(root, PetriNet::new("app"), "app").unwrap();

    let away = tree.add_to_interface(lib, "Shared").unwrap();
    assert_eq!(away, "root.lib.Shared");
    assert!(tree.node(root).unwrap().interface_place(&away).is_some());
    assert!(tree.node(sibling).unwrap().interface_place(&away).is_none());
    assert!(tree.use_interface_place(sibling, &away).is_err());
    tree.use_interface_place(root, &away).unwrap();
}
