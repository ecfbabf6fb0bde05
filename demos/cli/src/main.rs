use std::fs::File;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use env_logger::Env;
use log::{info, warn};
use strum::IntoEnumIterator;

use octomesh::{
    comm::{Communicator, LocalCluster, SerialComm},
    config::MeshDict,
    generator::{CartesianMeshGenerator, TetMeshGenerator, VoronoiMeshGenerator},
    mesh::PolyMesh,
    surface::TriSurface,
    workflow::Step,
};

/// Octree-based volume mesher
#[derive(Parser)]
#[clap(author, version, about, long_about = None)]
struct Args {
    #[clap(subcommand)]
    cmd: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Hex-dominant polyhedral mesh
    Cartesian {
        #[clap(flatten)]
        settings: MeshSettings,
    },

    /// One-cell-thick mesh of a surface extruded along z
    Cartesian2d {
        #[clap(flatten)]
        settings: MeshSettings,
    },

    /// Tetrahedral mesh
    Tet {
        #[clap(flatten)]
        settings: MeshSettings,
    },

    /// Polyhedral mesh dual to the tetrahedral one
    Voronoi {
        #[clap(flatten)]
        settings: MeshSettings,
    },

    /// Prints the names of the workflow steps, in order
    Steps,
}

#[derive(Copy, Clone, Debug)]
enum Kind {
    Cartesian,
    Cartesian2d,
    Tet,
    Voronoi,
}

#[derive(Parser)]
struct MeshSettings {
    /// Input surface (`.stl`, ASCII or binary)
    #[clap(short, long)]
    surface: PathBuf,

    /// Mesh dictionary (`.json`)
    #[clap(short, long)]
    dict: PathBuf,

    /// Name of a `.json` file to write the mesh to
    #[clap(short, long)]
    out: Option<PathBuf>,

    /// Name of a `.stl` file to write the mesh boundary to
    #[clap(long)]
    stl: Option<PathBuf>,

    /// Patch name for surfaces read from binary STL files
    #[clap(long, default_value = "walls")]
    patch: String,

    /// Number of threads to use (overrides the dictionary)
    #[clap(short, long)]
    threads: Option<NonZeroUsize>,

    /// Number of in-process ranks to run
    #[clap(short, long, default_value_t = NonZeroUsize::MIN)]
    ranks: NonZeroUsize,

    /// Mesh written by an earlier run, to continue from
    #[clap(long, requires = "restart_after")]
    restart: Option<PathBuf>,

    /// Step after which the earlier run's results are kept
    #[clap(long, requires = "restart")]
    restart_after: Option<Step>,

    /// Step after which to stop
    #[clap(long)]
    stop_after: Option<Step>,
}

////////////////////////////////////////////////////////////////////////////////

fn generate<C: Communicator + Sync>(
    kind: Kind,
    surface: TriSurface,
    dict: &MeshDict,
    checkpoint: Option<PolyMesh>,
    comm: &C,
) -> Result<PolyMesh, octomesh::Error> {
    match kind {
        Kind::Cartesian | Kind::Cartesian2d => {
            let g = if matches!(kind, Kind::Cartesian2d) {
                CartesianMeshGenerator::new_2d(surface, dict)
            } else {
                CartesianMeshGenerator::new(surface, dict)
            };
            match checkpoint {
                Some(m) => g.with_checkpoint(m).generate(comm),
                None => g.generate(comm),
            }
        }
        Kind::Tet => {
            let g = TetMeshGenerator::new(surface, dict);
            match checkpoint {
                Some(m) => g.with_checkpoint(m).generate(comm),
                None => g.generate(comm),
            }
        }
        Kind::Voronoi => {
            let g = VoronoiMeshGenerator::new(surface, dict);
            match checkpoint {
                Some(m) => g.with_checkpoint(m).generate(comm),
                None => g.generate(comm),
            }
        }
    }
}

fn read_surface(path: &Path, patch: &str) -> Result<TriSurface> {
    let mut file = File::open(path).with_context(|| format!("opening {path:?}"))?;
    Ok(TriSurface::read_stl(&mut file, patch)?)
}

fn run(kind: Kind, settings: MeshSettings) -> Result<()> {
    let now = Instant::now();
    let surface = read_surface(&settings.surface, &settings.patch)?;
    info!(
        "Loaded surface with {} facets in {} patches in {:?}",
        surface.facets().len(),
        surface.patches().len(),
        now.elapsed()
    );

    let text = std::fs::read_to_string(&settings.dict)
        .with_context(|| format!("reading {:?}", settings.dict))?;
    let mut dict = MeshDict::from_json(&text)?;
    if let Some(t) = settings.threads {
        dict.threads = Some(t.get());
    }
    if let Some(s) = settings.stop_after {
        dict.workflow.stop_after_step = Some(s.to_string());
    }
    if let Some(s) = settings.restart_after {
        dict.workflow.restart_after_step = Some(s.to_string());
    }
    let checkpoint = match &settings.restart {
        Some(path) => {
            let file = File::open(path).with_context(|| format!("opening {path:?}"))?;
            Some(PolyMesh::read_json(file)?)
        }
        None => None,
    };

    let start = Instant::now();
    let mesh = if settings.ranks.get() == 1 {
        generate(kind, surface, &dict, checkpoint, &SerialComm)?
    } else {
        let n = settings.ranks.get();
        let meshes = LocalCluster::run(n, |comm| {
            generate(kind, surface.clone(), &dict, checkpoint.clone(), comm)
        });
        let mut out = None;
        for (rank, m) in meshes.into_iter().enumerate() {
            let m = m.with_context(|| format!("rank {rank} failed"))?;
            if rank == 0 {
                out = Some(m);
            }
        }
        out.unwrap_or_default()
    };
    info!(
        "Generated {kind:?} mesh with {} points, {} faces and {} cells in {:?}",
        mesh.n_points(),
        mesh.n_faces(),
        mesh.n_cells(),
        start.elapsed()
    );
    for p in mesh.patches() {
        info!("  patch {}: {} faces", p.name, p.size);
    }

    if let Some(out) = &settings.out {
        info!("Writing mesh to {out:?}");
        mesh.write_json(File::create(out)?)?;
    }
    if let Some(stl) = &settings.stl {
        info!("Writing boundary to {stl:?}");
        mesh.write_boundary_stl(&mut File::create(stl)?)?;
    }
    if settings.out.is_none() && settings.stl.is_none() {
        warn!("no output requested");
    }
    Ok(())
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(Env::default().default_filter_or("info"))
        .init();

    let args = Args::parse();
    match args.cmd {
        Command::Cartesian { settings } => run(Kind::Cartesian, settings),
        Command::Cartesian2d { settings } => run(Kind::Cartesian2d, settings),
        Command::Tet { settings } => run(Kind::Tet, settings),
        Command::Voronoi { settings } => run(Kind::Voronoi, settings),
        Command::Steps => {
            for s in Step::iter() {
                println!("{s}");
            }
            Ok(())
        }
    }
}
