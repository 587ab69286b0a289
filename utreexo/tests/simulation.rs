use utreexo::sim::Simulator;
use utreexo::{utreexo_hasher, Forest, Hasher, MemStore, Pollard, UndoBlock};

fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_test_writer()
        .try_init();
}

fn hasher() -> Hasher<u64> {
    utreexo_hasher()
}

#[test]
fn sparse_and_dense_forests_agree() {
    init_logging();
    let mut forest = Forest::new(MemStore::new(), hasher()).unwrap();
    let mut pollard = Pollard::new(hasher());
    let mut full = Pollard::new_full(hasher());

    for block in Simulator::new(0x07).take(20) {
        let (proof, hashes) = forest.prove_batch(&block.dels).unwrap();
        assert_eq!(forest.verify_batch(&hashes, &proof), Ok(()));

        forest.modify(&block.adds, &proof.targets).unwrap();
        pollard.modify(&block.adds, &hashes, &proof).unwrap();
        full.modify(&block.adds, &hashes, &proof).unwrap();

        let roots = forest.roots().unwrap();
        assert_eq!(pollard.roots(), roots, "block {}", block.height);
        assert_eq!(full.roots(), roots, "block {}", block.height);
    }
    assert!(pollard.count_nodes() <= full.count_nodes());
}

#[test]
fn undo_walks_back_every_block() {
    init_logging();
    let mut forest = Forest::new(MemStore::new(), hasher()).unwrap();
    let mut history: Vec<(Vec<utreexo::Hash>, UndoBlock)> = Vec::new();

    for block in Simulator::with_limits(0x07, 64, 6).take(15) {
        let roots = forest.roots().unwrap();
        let (proof, _) = forest.prove_batch(&block.dels).unwrap();
        let undo = forest.modify(&block.adds, &proof.targets).unwrap();
        history.push((roots, undo));
    }
    while let Some((roots, undo)) = history.pop() {
        forest.undo(&undo).unwrap();
        assert_eq!(forest.roots().unwrap(), roots);
    }
    assert_eq!(forest.num_leaves(), 0);
}

#[test]
fn file_backed_forest_survives_reopen() {
    init_logging();
    let path = std::env::temp_dir().join(format!("utreexo-sim-{}.dat", std::process::id()));
    let _ = std::fs::remove_file(&path);

    let config = utreexo::Config::from_toml_str(&format!(
        "[forest]\nstore = \"file\"\npath = {:?}\ncache_fraction = 0.25\n",
        path.display().to_string()
    ))
    .unwrap();

    let (roots, num_leaves) = {
        let mut forest = Forest::new(config.open_store().unwrap(), hasher()).unwrap();
        for block in Simulator::with_limits(0x07, 100, 5).take(10) {
            let (proof, _) = forest.prove_batch(&block.dels).unwrap();
            forest.modify(&block.adds, &proof.targets).unwrap();
        }
        forest.close().unwrap();
        (forest.roots().unwrap(), forest.num_leaves())
    };

    let forest = Forest::restore(config.open_store().unwrap(), hasher(), num_leaves).unwrap();
    assert_eq!(forest.roots().unwrap(), roots);
    let some: Vec<_> = (0..num_leaves)
        .step_by(7)
        .map(|p| forest.leaf_at(p).unwrap())
        .collect();
    let (proof, hashes) = forest.prove_batch(&some).unwrap();
    assert_eq!(forest.verify_batch(&hashes, &proof), Ok(()));

    drop(forest);
    let _ = std::fs::remove_file(&path);
}
