//! Small reference networks built from mutual or cyclic repression.

use crate::Network;

const PRESET_BASAL: f64 = 5.0;
const PRESET_REPRESSION: f64 = -10.0;

fn repression_network(n_genes: usize, edges: &[(usize, usize)]) -> Network {
    let mut inter = vec![0.0; n_genes * n_genes];
    for &(from, to) in edges {
        inter[from * n_genes + to] = PRESET_REPRESSION;
    }
    Network {
        n_genes,
        basal: vec![PRESET_BASAL; n_genes],
        inter,
    }
}

/// Two genes repressing each other.
pub fn toggle_switch() -> Network {
    repression_network(2, &[(0, 1), (1, 0)])
}

/// Three genes in a repression cycle: 1 represses 2, 2 represses 3, 3 represses 1.
pub fn repressilator() -> Network {
    repression_network(3, &[(0, 1), (1, 2), (2, 0)])
}
