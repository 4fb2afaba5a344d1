//! Graph freeze/load round trips over randomized graphs.

use cairn_common::{path_hash, Digest, FileAndHash};
use cairn_dag::{
    save_dag, write_dag, Dag, DagData, DagError, EnvVar, FileSignature, GenericFlags,
    GenericScanner, GlobSignature, Keyword, NodeData, NodeFlags, Pass, Scanner, ScannerKind,
};
use cairn_frozen::{FrozenError, DAG_MAGIC};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

fn name(rng: &mut StdRng, prefix: &str) -> String {
    format!("{prefix}/{}.{}", rng.gen_range(0..10_000), ["c", "h", "o", "s"][rng.gen_range(0..4)])
}

fn files(rng: &mut StdRng, prefix: &str, max: usize) -> Vec<FileAndHash> {
    (0..rng.gen_range(0..=max))
        .map(|_| FileAndHash::new(name(rng, prefix)))
        .collect()
}

fn scanners() -> Vec<Scanner> {
    vec![
        Scanner::new(ScannerKind::Cpp, vec!["include".into(), "/usr/include".into()]).unwrap(),
        Scanner::new(
            ScannerKind::Generic(GenericScanner {
                flags: GenericFlags::from_bits(
                    GenericFlags::REQUIRE_WHITESPACE.bits() | GenericFlags::BARE_MEANS_SYSTEM.bits(),
                ),
                keywords: vec![
                    Keyword {
                        text: "include".into(),
                        follow: true,
                    },
                    Keyword {
                        text: "incbin".into(),
                        follow: false,
                    },
                ],
            }),
            vec!["asm".into()],
        )
        .unwrap(),
    ]
}

fn random_dag(seed: u64, node_count: usize) -> DagData {
    let mut rng = StdRng::seed_from_u64(seed);
    let scanners = scanners();
    let passes = vec![
        Pass {
            name: "codegen".into(),
            build_order: 1,
        },
        Pass {
            name: "compile".into(),
            build_order: 10,
        },
        Pass {
            name: "link".into(),
            build_order: 20,
        },
    ];

    let mut nodes: Vec<NodeData> = (0..node_count)
        .map(|i| {
            let mut deps: Vec<u32> = (0..i as u32).filter(|_| rng.gen_bool(0.2)).collect();
            deps.truncate(4);
            let mut flags = NodeFlags::empty();
            if rng.gen_bool(0.3) {
                flags.insert(NodeFlags::PRECIOUS_OUTPUTS);
            }
            if rng.gen_bool(0.3) {
                flags.insert(NodeFlags::OVERWRITE_OUTPUTS);
            }
            NodeData {
                guid: Digest::from_bytes(format!("node {i} {}", rng.gen::<u64>()).as_bytes()),
                flags,
                action: format!("tool --job {i}"),
                annotation: if rng.gen_bool(0.5) {
                    format!("Job {i}")
                } else {
                    String::new()
                },
                pass_index: rng.gen_range(0..passes.len() as u32),
                dependencies: deps,
                back_links: Vec::new(),
                inputs: files(&mut rng, "src", 5),
                outputs: files(&mut rng, "out", 3),
                output_dirs: files(&mut rng, "dirs", 1),
                aux_outputs: files(&mut rng, "aux", 2),
                env_vars: (0..rng.gen_range(0..3))
                    .map(|k| EnvVar {
                        name: format!("VAR{k}"),
                        value: format!("{}", rng.gen::<u32>()),
                    })
                    .collect(),
                scanner: match rng.gen_range(0..3) {
                    0 => None,
                    k => Some(scanners[k - 1].clone()),
                },
            }
        })
        .collect();
    for i in 0..nodes.len() {
        for dep in nodes[i].dependencies.clone() {
            nodes[dep as usize].back_links.push(i as u32);
        }
    }

    DagData {
        nodes,
        passes,
        file_signatures: vec![
            FileSignature {
                path: "graph.lua".into(),
                timestamp: rng.gen(),
            },
            FileSignature {
                path: "rules.lua".into(),
                timestamp: 0,
            },
        ],
        glob_signatures: vec![GlobSignature {
            path: "src".into(),
            digest: Digest::from_bytes(b"listing"),
        }],
        content_digest_extensions: vec![path_hash(".c"), path_hash(".h")],
        state_file_name: "build.state".into(),
        state_file_name_tmp: "build.state.tmp".into(),
        scan_cache_file_name: "build.scancache".into(),
        scan_cache_file_name_tmp: "build.scancache.tmp".into(),
        digest_cache_file_name: "build.digestcache".into(),
        digest_cache_file_name_tmp: "build.digestcache.tmp".into(),
        build_title: Some(format!("seed {seed}")),
    }
}

fn bytes_of(data: &DagData) -> Vec<u8> {
    write_dag(data).into_bytes(Some(DAG_MAGIC))
}

#[test]
fn randomized_roundtrip() {
    for seed in 0..16 {
        let data = random_dag(seed, 1 + seed as usize * 7);
        let dag = Dag::from_bytes(bytes_of(&data)).unwrap();
        assert_eq!(dag.to_data().unwrap(), data, "seed {seed}");

        for (i, node) in data.nodes.iter().enumerate() {
            let view = dag.node(i as u32).unwrap();
            assert_eq!(view.action().unwrap(), node.action);
            assert_eq!(
                view.input_files().unwrap().len(),
                node.inputs.len(),
                "seed {seed} node {i}"
            );
            if let Some(s) = &node.scanner {
                let sv = view.scanner().unwrap().unwrap();
                assert_eq!(sv.guid().unwrap(), s.guid);
                assert_eq!(sv.to_owned().unwrap(), *s);
            }
            assert_eq!(dag.find_node_by_digest(&node.guid).unwrap(), Some(i as u32));
        }
    }
}

#[test]
fn generic_keywords_keep_length_and_follow() {
    let data = random_dag(3, 40);
    let dag = Dag::from_bytes(bytes_of(&data)).unwrap();
    let generic = data
        .nodes
        .iter()
        .position(|n| matches!(n.scanner.as_ref().map(|s| &s.kind), Some(ScannerKind::Generic(_))))
        .expect("seeded graph has a generic scanner");
    let sv = dag.node(generic as u32).unwrap().scanner().unwrap().unwrap();
    assert_eq!(sv.kind().unwrap(), 1);
    let kws = sv.keywords().unwrap().to_vec().unwrap();
    assert_eq!(kws[0].text, "include");
    assert_eq!(kws[0].len, 7);
    assert!(kws[0].follow);
    assert_eq!(kws[1].len, 6);
    assert!(!kws[1].follow);
    assert!(sv.generic_flags().unwrap().contains(GenericFlags::BARE_MEANS_SYSTEM));
}

#[test]
fn loading_twice_is_identical() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("build.dag");
    let data = random_dag(7, 25);
    save_dag(&data, &dir.path().join("build.dag.tmp"))
        .unwrap()
        .publish(&path)
        .unwrap();

    let first = Dag::open(&path).unwrap().to_data().unwrap();
    let second = Dag::open(&path).unwrap().to_data().unwrap();
    assert_eq!(first, second);
    assert_eq!(first, data);
}

#[test]
fn header_byte_flip_is_bad_magic() {
    let mut bytes = bytes_of(&random_dag(1, 5));
    bytes[2] ^= 0xff;
    assert!(matches!(
        Dag::from_bytes(bytes),
        Err(DagError::Frozen(FrozenError::BadMagic { .. }))
    ));
}

#[test]
fn trailer_byte_flip_is_bad_magic() {
    let mut bytes = bytes_of(&random_dag(1, 5));
    let last = bytes.len() - 1;
    bytes[last] ^= 0x01;
    assert!(matches!(
        Dag::from_bytes(bytes),
        Err(DagError::Frozen(FrozenError::BadMagic { .. }))
    ));
}

#[test]
fn truncated_below_header() {
    let bytes = bytes_of(&random_dag(2, 5));
    let short = bytes[..40].to_vec();
    assert!(matches!(
        Dag::from_bytes(short),
        Err(DagError::Frozen(FrozenError::Truncated { .. }))
    ));
}

#[test]
fn missing_trailer_is_rejected() {
    let bytes = write_dag(&random_dag(4, 5)).into_bytes(None);
    assert!(Dag::from_bytes(bytes).is_err());
}

#[test]
fn open_missing_file() {
    let dir = tempfile::tempdir().unwrap();
    assert!(matches!(
        Dag::open(&dir.path().join("none.dag")),
        Err(DagError::Frozen(FrozenError::Io { .. }))
    ));
}
