use sha2::{Digest, Sha256};

pub struct MerkleTree {
    pub root_node: MerkleNode,
}

/// Only the digest of each node is kept; levels are folded as they are built.
pub struct MerkleNode {
    pub data: Vec<u8>,
}

fn new_merkle_node(
    left: Option<&MerkleNode>,
    right: Option<&MerkleNode>,
    data: &[u8],
) -> MerkleNode {
    let mut hasher = Sha256::new();
    match (left, right) {
        (Some(l), Some(r)) => {
            hasher.update(&l.data);
            hasher.update(&r.data);
        }
        _ => hasher.update(data),
    }
    MerkleNode {
        data: hasher.finalize().to_vec(),
    }
}

/// Builds the tree bottom-up. A level with an odd number of nodes
/// duplicates its last node; an empty leaf set hashes to SHA256("").
pub fn new_merkle_tree(data: &[Vec<u8>]) -> MerkleTree {
    let mut nodes: Vec<MerkleNode> = data
        .iter()
        .map(|datum| new_merkle_node(None, None, datum))
        .collect();

    if nodes.is_empty() {
        return MerkleTree {
            root_node: new_merkle_node(None, None, &[]),
        };
    }

    while nodes.len() > 1 {
        nodes = nodes
            .chunks(2)
            .map(|pair| {
                // a lone node at the end is paired with itself
                let right = pair.get(1).unwrap_or(&pair[0]);
                new_merkle_node(Some(&pair[0]), Some(right), &[])
            })
            .collect();
    }

    MerkleTree {
        root_node: nodes.remove(0),
    }
}
