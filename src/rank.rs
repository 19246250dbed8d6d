use log::debug;
#[cfg(feature = "mpi")]
use mpi::traits::Communicator;

/// Launcher variables holding the node-local rank and node-local size, in lookup order.
const LOCAL_RANK_VARIABLES: &[(&str, &str)] = &[
    ("OMPI_COMM_WORLD_LOCAL_RANK", "OMPI_COMM_WORLD_LOCAL_SIZE"),
    ("MPI_LOCALRANKID", "MPI_LOCALNRANKS"),
    ("MV2_COMM_WORLD_LOCAL_RANK", "MV2_COMM_WORLD_LOCAL_SIZE"),
    ("PMI_LOCAL_RANK", "PMI_LOCAL_SIZE"),
    ("SLURM_LOCALID", "SLURM_TASKS_PER_NODE"),
];

/// Position of this process among the processes sharing its host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeRank {
    pub rank: i32,
    pub size: i32,
}

impl Default for NodeRank {
    fn default() -> Self {
        Self::single()
    }
}

impl NodeRank {
    pub fn new(rank: i32, size: i32) -> Self {
        Self { rank, size }
    }

    /// A process that is alone on its host.
    pub fn single() -> Self {
        Self { rank: 0, size: 1 }
    }

    /// Only node-local rank 0 queries the source and writes logs.
    pub fn is_reporter(&self) -> bool {
        self.rank == 0
    }

    /// Node-local rank as published by the MPI launcher.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        for (rank_var, size_var) in LOCAL_RANK_VARIABLES {
            let Some(rank) = lookup(rank_var).and_then(|v| v.trim().parse::<i32>().ok()) else {
                continue;
            };
            let size = lookup(size_var)
                .and_then(|v| parse_leading_count(&v))
                .unwrap_or(rank + 1);
            debug!("Node-local rank {} of {} taken from {}", rank, size, rank_var);
            return Self { rank, size };
        }
        Self::single()
    }

    /// Split `world` into per-host communicators and take this process's place in its own.
    #[cfg(feature = "mpi")]
    pub fn from_communicator<C>(world: &C) -> Self
    where
        C: Communicator,
    {
        let node = world.split_shared(world.rank());
        Self {
            rank: node.rank(),
            size: node.size(),
        }
    }
}

/// `SLURM_TASKS_PER_NODE` looks like `4(x2),3`; the first count is this node's for block layouts.
fn parse_leading_count(value: &str) -> Option<i32> {
    let digits: String = value
        .trim()
        .chars()
        .take_while(|c| c.is_ascii_digit())
        .collect();
    digits.parse().ok()
}
