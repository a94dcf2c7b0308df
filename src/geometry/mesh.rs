//! Quadrilateral meshes with a spatial index.
//!
//! A baked warp is a scanline-ordered grid of vertices carrying their
//! source UVs. The mesh answers one question fast: which face contains a
//! canvas point, and what UV does that point interpolate to. The octree
//! stores face *indices* into the mesh's face vector, never pointers, so a
//! rebuild after a vertex transform is cheap and cycle-free.

use crate::error::{PsdError, Result};
use crate::geometry::transform::{unit_quad, Homography};
use crate::geometry::{BoundingBox, Point2D};

/// Most faces a leaf holds before it subdivides, and the most candidates a
/// point query returns.
const MAX_FACES: usize = 128;

/// Depth cap preventing runaway subdivision of coincident geometry.
const MAX_DEPTH: usize = 16;

/// A mesh point with its UV coordinate into the source image.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Vertex {
    point: Point2D,
    uv: Point2D,
}

impl Vertex {
    /// Create a vertex.
    pub fn new(point: Point2D, uv: Point2D) -> Vertex {
        Vertex { point, uv }
    }

    /// Position in canvas space.
    pub fn point(&self) -> Point2D {
        self.point
    }

    /// UV into the source image, each component in `[0, 1]`.
    pub fn uv(&self) -> Point2D {
        self.uv
    }
}

/// A quad face referencing its corners by vertex index:
/// top-left, top-right, bottom-left, bottom-right.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Face {
    vertex_indices: [usize; 4],
    bbox: BoundingBox,
}

/// 8-way subdivision tree over face indices. The geometry is 2D so the z
/// split is degenerate: children 4..8 mirror the bboxes of 0..4.
#[derive(Debug, Clone, PartialEq)]
struct OctreeNode {
    bbox: BoundingBox,
    face_indices: Vec<usize>,
    children: Option<Box<[OctreeNode; 8]>>,
}

impl OctreeNode {
    fn new(bbox: BoundingBox) -> OctreeNode {
        OctreeNode {
            bbox,
            face_indices: Vec::new(),
            children: None,
        }
    }

    fn subdivide(&mut self) {
        let mid = Point2D::new(
            (self.bbox.minimum.x + self.bbox.maximum.x) * 0.5,
            (self.bbox.minimum.y + self.bbox.maximum.y) * 0.5,
        );

        let children = std::array::from_fn(|i| {
            let minimum = Point2D::new(
                if i & 1 != 0 { mid.x } else { self.bbox.minimum.x },
                if i & 2 != 0 { mid.y } else { self.bbox.minimum.y },
            );
            let maximum = Point2D::new(
                if i & 1 != 0 { self.bbox.maximum.x } else { mid.x },
                if i & 2 != 0 { self.bbox.maximum.y } else { mid.y },
            );
            OctreeNode::new(BoundingBox::new(minimum, maximum))
        });

        self.children = Some(Box::new(children));
    }

    fn insert(&mut self, faces: &[Face], face_index: usize, depth: usize) -> Result<()> {
        if !self.bbox.overlaps(&faces[face_index].bbox) {
            return Ok(());
        }

        match &mut self.children {
            Some(children) => {
                for child in children.iter_mut() {
                    child.insert(faces, face_index, depth + 1)?;
                }
                Ok(())
            }
            None => {
                self.face_indices.push(face_index);
                if self.face_indices.len() > MAX_FACES {
                    if depth >= MAX_DEPTH {
                        return Err(PsdError::InvalidArgument(format!(
                            "octree leaf exceeds {} faces at maximum depth, geometry too dense",
                            MAX_FACES
                        )));
                    }
                    self.subdivide();
                    let pending = std::mem::take(&mut self.face_indices);
                    for index in pending {
                        // Re-insert through self so the children filter by
                        // their own bboxes.
                        self.insert(faces, index, depth)?;
                    }
                }
                Ok(())
            }
        }
    }

    /// The candidate faces of the first leaf containing `position`.
    fn query(&self, position: Point2D) -> Option<&[usize]> {
        if !self.bbox.in_bbox(position) {
            return None;
        }
        match &self.children {
            None => Some(&self.face_indices),
            Some(children) => children.iter().find_map(|child| child.query(position)),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
struct Octree {
    root: OctreeNode,
}

impl Octree {
    fn build(bbox: BoundingBox, faces: &[Face]) -> Result<Octree> {
        let mut root = OctreeNode::new(bbox);
        for index in 0..faces.len() {
            root.insert(faces, index, 0)?;
        }
        Ok(Octree { root })
    }

    fn query(&self, position: Point2D) -> &[usize] {
        self.root.query(position).unwrap_or(&[])
    }
}

/// A grid of quad faces with per-vertex UVs and an octree for point
/// queries.
#[derive(Debug, Clone, PartialEq)]
pub struct QuadMesh {
    vertices: Vec<Vertex>,
    faces: Vec<Face>,
    bbox: BoundingBox,
    octree: Octree,
}

impl QuadMesh {
    /// Build a mesh from points in scanline order; UVs come from the
    /// point's position in the lattice.
    pub fn new(points: Vec<Point2D>, x_divisions: usize, y_divisions: usize) -> Result<QuadMesh> {
        Self::new_transformed(points, unit_quad(), x_divisions, y_divisions)
    }

    /// Like [`new`](Self::new), but pushes every point through the
    /// homography taking the unit quad onto `non_affine_transform`,
    /// normalized over the lattice's bounding box. The unit quad is a
    /// no-op.
    pub fn new_transformed(
        mut points: Vec<Point2D>,
        non_affine_transform: [Point2D; 4],
        x_divisions: usize,
        y_divisions: usize,
    ) -> Result<QuadMesh> {
        if x_divisions < 2 || y_divisions < 2 || points.len() != x_divisions * y_divisions {
            return Err(PsdError::InvalidArgument(format!(
                "{} points do not form a {}x{} quad lattice",
                points.len(),
                x_divisions,
                y_divisions
            )));
        }

        if non_affine_transform != unit_quad() {
            let homography = Homography::from_quad_to_quad(unit_quad(), non_affine_transform)?;
            let bbox = BoundingBox::compute(points.iter().copied());
            let size_x = bbox.width().max(f64::MIN_POSITIVE);
            let size_y = bbox.height().max(f64::MIN_POSITIVE);
            for point in &mut points {
                let normalized = Point2D::new(
                    (point.x - bbox.minimum.x) / size_x,
                    (point.y - bbox.minimum.y) / size_y,
                );
                let mapped = homography.apply(normalized);
                *point = Point2D::new(
                    bbox.minimum.x + mapped.x * size_x,
                    bbox.minimum.y + mapped.y * size_y,
                );
            }
        }

        let mut vertices = Vec::with_capacity(points.len());
        for y in 0..y_divisions {
            let v = y as f64 / (y_divisions - 1) as f64;
            for x in 0..x_divisions {
                let u = x as f64 / (x_divisions - 1) as f64;
                vertices.push(Vertex::new(points[y * x_divisions + x], Point2D::new(u, v)));
            }
        }

        Self::from_vertices(vertices, x_divisions, y_divisions)
    }

    /// Build a mesh from prepared vertices in scanline order.
    pub fn from_vertices(
        vertices: Vec<Vertex>,
        x_divisions: usize,
        y_divisions: usize,
    ) -> Result<QuadMesh> {
        if x_divisions < 2 || y_divisions < 2 || vertices.len() != x_divisions * y_divisions {
            return Err(PsdError::InvalidArgument(format!(
                "{} vertices do not form a {}x{} quad lattice",
                vertices.len(),
                x_divisions,
                y_divisions
            )));
        }

        let bbox = BoundingBox::compute(vertices.iter().map(Vertex::point));

        let mut faces = Vec::with_capacity((x_divisions - 1) * (y_divisions - 1));
        for y in 0..y_divisions - 1 {
            for x in 0..x_divisions - 1 {
                let v0 = y * x_divisions + x; // top-left
                let v1 = v0 + 1; // top-right
                let v2 = v0 + x_divisions; // bottom-left
                let v3 = v2 + 1; // bottom-right

                let face_bbox = BoundingBox::compute(
                    [v0, v1, v2, v3].into_iter().map(|i| vertices[i].point()),
                );
                faces.push(Face {
                    vertex_indices: [v0, v1, v2, v3],
                    bbox: face_bbox,
                });
            }
        }

        let octree = Octree::build(bbox, &faces)?;

        Ok(QuadMesh {
            vertices,
            faces,
            bbox,
            octree,
        })
    }

    /// The mesh vertices in scanline order.
    pub fn vertices(&self) -> &[Vertex] {
        &self.vertices
    }

    /// Just the vertex positions.
    pub fn points(&self) -> Vec<Point2D> {
        self.vertices.iter().map(Vertex::point).collect()
    }

    /// Number of quad faces.
    pub fn num_faces(&self) -> usize {
        self.faces.len()
    }

    /// The box around all vertices.
    pub fn bbox(&self) -> BoundingBox {
        self.bbox
    }

    /// Translate the whole mesh, then rebuild face bboxes and the octree.
    pub fn translate(&mut self, offset: Point2D) -> Result<()> {
        for vertex in &mut self.vertices {
            vertex.point = vertex.point + offset;
        }
        for face in &mut self.faces {
            face.bbox = BoundingBox::new(face.bbox.minimum + offset, face.bbox.maximum + offset);
        }
        self.bbox = BoundingBox::new(self.bbox.minimum + offset, self.bbox.maximum + offset);
        self.octree = Octree::build(self.bbox, &self.faces)?;
        Ok(())
    }

    /// The UV under `position`, or `None` when the point lies outside the
    /// mesh.
    ///
    /// The face comes from the octree; the UV from barycentric
    /// interpolation over the triangle of the containing half-quad.
    pub fn uv_coordinate(&self, position: Point2D) -> Option<Point2D> {
        if !self.bbox.in_bbox(position) {
            return None;
        }

        for &face_index in self.octree.query(position) {
            let face = &self.faces[face_index];
            // Reject on the bbox first, it is cheaper than the triangle
            // tests.
            if !face.bbox.in_bbox(position) {
                continue;
            }

            let [i0, i1, i2, i3] = face.vertex_indices;
            let (v0, v1, v2, v3) = (
                self.vertices[i0],
                self.vertices[i1],
                self.vertices[i2],
                self.vertices[i3],
            );

            if point_in_triangle(position, v0.point, v1.point, v3.point) {
                return Some(interpolate_uv(position, v0, v1, v3));
            }
            if point_in_triangle(position, v0.point, v2.point, v3.point) {
                return Some(interpolate_uv(position, v0, v2, v3));
            }
        }

        None
    }
}

/// Sign-based point-in-triangle test; boundary points count as inside.
fn point_in_triangle(point: Point2D, a: Point2D, b: Point2D, c: Point2D) -> bool {
    let sign = |p1: Point2D, p2: Point2D, p3: Point2D| {
        (p1.x - p3.x) * (p2.y - p3.y) - (p2.x - p3.x) * (p1.y - p3.y)
    };

    let d1 = sign(point, a, b);
    let d2 = sign(point, b, c);
    let d3 = sign(point, c, a);

    let has_neg = d1 < 0.0 || d2 < 0.0 || d3 < 0.0;
    let has_pos = d1 > 0.0 || d2 > 0.0 || d3 > 0.0;

    !(has_neg && has_pos)
}

fn interpolate_uv(point: Point2D, a: Vertex, b: Vertex, c: Vertex) -> Point2D {
    let (u, v, w) = barycentric(point, a.point, b.point, c.point);
    Point2D::new(
        u * a.uv.x + v * b.uv.x + w * c.uv.x,
        u * a.uv.y + v * b.uv.y + w * c.uv.y,
    )
}

fn barycentric(p: Point2D, a: Point2D, b: Point2D, c: Point2D) -> (f64, f64, f64) {
    let dot = |a: Point2D, b: Point2D| a.x * b.x + a.y * b.y;

    let v0 = b - a;
    let v1 = c - a;
    let v2 = p - a;

    let d00 = dot(v0, v0);
    let d01 = dot(v0, v1);
    let d11 = dot(v1, v1);
    let d20 = dot(v2, v0);
    let d21 = dot(v2, v1);

    let denom = d00 * d11 - d01 * d01;
    if denom.abs() < 1e-18 {
        return (1.0, 0.0, 0.0);
    }
    let v = (d11 * d20 - d01 * d21) / denom;
    let w = (d00 * d21 - d01 * d20) / denom;
    (1.0 - v - w, v, w)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lattice(x_divisions: usize, y_divisions: usize, width: f64, height: f64) -> Vec<Point2D> {
        let mut points = Vec::new();
        for y in 0..y_divisions {
            for x in 0..x_divisions {
                points.push(Point2D::new(
                    width * x as f64 / (x_divisions - 1) as f64,
                    height * y as f64 / (y_divisions - 1) as f64,
                ));
            }
        }
        points
    }

    #[test]
    fn every_vertex_maps_to_its_own_uv() {
        let mesh = QuadMesh::new(lattice(9, 7, 120.0, 80.0), 9, 7).unwrap();

        for vertex in mesh.vertices() {
            let uv = mesh.uv_coordinate(vertex.point()).expect("vertex on mesh");
            assert!(
                uv.distance(vertex.uv()) < 1e-6,
                "vertex at {:?}: expected uv {:?}, got {:?}",
                vertex.point(),
                vertex.uv(),
                uv
            );
        }
    }

    #[test]
    fn interior_points_interpolate() {
        let mesh = QuadMesh::new(lattice(2, 2, 10.0, 10.0), 2, 2).unwrap();
        let uv = mesh.uv_coordinate(Point2D::new(5.0, 5.0)).unwrap();
        assert!(uv.distance(Point2D::new(0.5, 0.5)) < 1e-9);

        let uv = mesh.uv_coordinate(Point2D::new(2.5, 7.5)).unwrap();
        assert!(uv.distance(Point2D::new(0.25, 0.75)) < 1e-9);
    }

    #[test]
    fn outside_points_return_none() {
        let mesh = QuadMesh::new(lattice(3, 3, 10.0, 10.0), 3, 3).unwrap();
        assert!(mesh.uv_coordinate(Point2D::new(-1.0, 5.0)).is_none());
        assert!(mesh.uv_coordinate(Point2D::new(11.0, 11.0)).is_none());
    }

    #[test]
    fn large_mesh_subdivides_and_still_answers() {
        // 40x40 faces forces several levels of subdivision past MAX_FACES.
        let mesh = QuadMesh::new(lattice(41, 41, 400.0, 400.0), 41, 41).unwrap();
        assert_eq!(mesh.num_faces(), 1600);

        for vertex in mesh.vertices().iter().step_by(17) {
            let uv = mesh.uv_coordinate(vertex.point()).expect("vertex on mesh");
            assert!(uv.distance(vertex.uv()) < 1e-6);
        }
    }

    #[test]
    fn translate_rebuilds_the_index() {
        let mut mesh = QuadMesh::new(lattice(3, 3, 10.0, 10.0), 3, 3).unwrap();
        mesh.translate(Point2D::new(100.0, -50.0)).unwrap();

        assert!(mesh.uv_coordinate(Point2D::new(5.0, 5.0)).is_none());
        let uv = mesh.uv_coordinate(Point2D::new(105.0, -45.0)).unwrap();
        assert!(uv.distance(Point2D::new(0.5, 0.5)) < 1e-9);
    }

    #[test]
    fn non_affine_transform_keeps_corner_uvs() {
        let skewed = [
            Point2D::new(0.0, 0.0),
            Point2D::new(1.0, 0.2),
            Point2D::new(0.0, 1.0),
            Point2D::new(1.0, 0.8),
        ];
        let mesh =
            QuadMesh::new_transformed(lattice(5, 5, 100.0, 100.0), skewed, 5, 5).unwrap();

        // Top-left corner stays put under this quad, and keeps uv (0, 0).
        let uv = mesh.uv_coordinate(Point2D::new(0.0, 0.0)).unwrap();
        assert!(uv.distance(Point2D::new(0.0, 0.0)) < 1e-6);
    }
}
